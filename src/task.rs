// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/task.rs - 检测任务调度
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
  },
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  input::{ImageHandle, ImageLoader},
  model::{DetectError, DetectionRecord, EngineBuilder, InferenceEngine, SpirocheteDetector},
  output::{DisplaySurface, Draw, Render},
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DETECTING_TEXT: &str = "检测中…";
pub const MODEL_UNAVAILABLE_TEXT: &str = "检测不可用";
pub const IMAGE_UNAVAILABLE_TEXT: &str = "图像不可用";
pub const DETECT_FAILED_TEXT: &str = "检测失败";

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 加载一张图像，检测一次，把结果交给输出
pub struct OneShotTask {
  timeout: Duration,
}

impl Default for OneShotTask {
  fn default() -> Self {
    Self {
      timeout: DEFAULT_TIMEOUT,
    }
  }
}

impl OneShotTask {
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }
}

impl<'a, B, O> Task<ImageHandle, &'a SpirocheteDetector<B>, O> for OneShotTask
where
  B: EngineBuilder,
  B::Error: std::error::Error + Send + Sync + 'static,
  <B::Engine as InferenceEngine>::Error: std::error::Error + Send + Sync + 'static,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = Vec<DetectionRecord>;
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: ImageHandle,
    model: &'a SpirocheteDetector<B>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let now = Instant::now();
    let records = model.run_object_detection(&input, self.timeout)?;
    let image = input.image(self.timeout)?;
    info!("检测完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&image, &records)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());
    Ok(records)
  }
}

#[derive(Debug)]
pub enum DetectionOutcome {
  /// 已绘制检测框的图像副本和检测记录
  Found {
    image: Arc<RgbImage>,
    records: Vec<DetectionRecord>,
  },
  Failed(DetectError),
}

#[derive(Debug)]
pub struct DetectionUpdate {
  pub generation: u64,
  pub outcome: DetectionOutcome,
}

/// 交互式检测会话
///
/// 每次请求在独立线程中执行，结果带代数通过通道送回。
/// 只有最新一代的结果会被 [`DetectionSession::apply`] 写到显示面上。
pub struct DetectionSession<L, B> {
  loader: L,
  detector: Arc<SpirocheteDetector<B>>,
  draw: Draw,
  surface: DisplaySurface,
  current: Option<ImageHandle>,
  generation: Arc<AtomicU64>,
  timeout: Duration,
  updates: Sender<DetectionUpdate>,
}

impl<L, B> DetectionSession<L, B>
where
  L: ImageLoader,
  B: EngineBuilder + Send + Sync + 'static,
  B::Error: std::error::Error + Send + Sync + 'static,
  <B::Engine as InferenceEngine>::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(
    loader: L,
    detector: SpirocheteDetector<B>,
    surface: DisplaySurface,
  ) -> (Self, Receiver<DetectionUpdate>) {
    let (updates, rx) = mpsc::channel();
    let session = Self {
      loader,
      detector: Arc::new(detector),
      draw: Draw::default(),
      surface,
      current: None,
      generation: Arc::new(AtomicU64::new(0)),
      timeout: DEFAULT_TIMEOUT,
      updates,
    };
    (session, rx)
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn surface(&self) -> &DisplaySurface {
    &self.surface
  }

  pub fn detector(&self) -> &SpirocheteDetector<B> {
    &self.detector
  }

  pub fn current_image(&self) -> Option<&ImageHandle> {
    self.current.as_ref()
  }

  pub fn latest_generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// 选择或拍摄新图像：替换当前图像并立即发起检测
  pub fn select_image(&mut self, source: Url) -> u64 {
    let handle = ImageHandle::load(&self.loader, source, &self.surface);
    self.current = Some(handle.clone());
    self.spawn_detection(handle)
  }

  pub fn set_threshold(&self, threshold: f32) {
    self.detector.set_threshold(threshold);
  }

  pub fn set_max_results(&self, count: usize) {
    self.detector.set_max_results(count);
  }

  /// 对当前图像重新检测，没有图像时什么也不做
  pub fn request_detection(&self) -> Option<u64> {
    let handle = self.current.clone()?;
    Some(self.spawn_detection(handle))
  }

  fn spawn_detection(&self, handle: ImageHandle) -> u64 {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    self.surface.set_count_text(DETECTING_TEXT);
    debug!("发起第 {} 代检测: {}", generation, handle.source());

    let detector = Arc::clone(&self.detector);
    let latest = Arc::clone(&self.generation);
    let draw = self.draw.clone();
    let updates = self.updates.clone();
    let timeout = self.timeout;

    thread::spawn(move || {
      let outcome = match detector.run_object_detection(&handle, timeout) {
        Ok(records) => {
          if latest.load(Ordering::SeqCst) != generation {
            debug!("第 {} 代检测已过期，跳过绘制", generation);
            return;
          }
          match handle.image(timeout) {
            Ok(image) => DetectionOutcome::Found {
              image: Arc::new(draw.draw_detections(&image, &records)),
              records,
            },
            Err(e) => DetectionOutcome::Failed(e.into()),
          }
        }
        Err(e) => {
          warn!("第 {} 代检测失败: {}", generation, e);
          DetectionOutcome::Failed(e)
        }
      };

      if updates.send(DetectionUpdate { generation, outcome }).is_err() {
        debug!("结果接收端已关闭");
      }
    });

    generation
  }

  /// 在显示线程上应用结果，过期的结果被丢弃
  pub fn apply(&self, update: DetectionUpdate) -> bool {
    let latest = self.latest_generation();
    if update.generation != latest {
      debug!("丢弃过期结果: 第 {} 代，最新第 {} 代", update.generation, latest);
      return false;
    }

    match update.outcome {
      DetectionOutcome::Found { image, records } => {
        info!("显示检测结果: {} 个", records.len());
        self.surface.set_count_text(records.len().to_string());
        self.surface.set_bitmap(image);
      }
      DetectionOutcome::Failed(e) => {
        let text = match &e {
          DetectError::ModelUnavailable(_) => MODEL_UNAVAILABLE_TEXT,
          DetectError::ImageUnavailable(_) => IMAGE_UNAVAILABLE_TEXT,
          DetectError::Inference(_) => DETECT_FAILED_TEXT,
        };
        self.surface.set_count_text(text);
      }
    }
    true
  }

  /// 持续接收并应用结果，直到最新一代的结果被应用或超时
  pub fn apply_until_current(
    &self,
    rx: &Receiver<DetectionUpdate>,
    timeout: Duration,
  ) -> Option<u64> {
    let deadline = Instant::now() + timeout;
    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match rx.recv_timeout(remaining) {
        Ok(update) => {
          let generation = update.generation;
          if self.apply(update) {
            return Some(generation);
          }
        }
        Err(RecvTimeoutError::Timeout) => {
          warn!("等待检测结果超时");
          return None;
        }
        Err(RecvTimeoutError::Disconnected) => return None,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    config::DetectionConfig,
    gate::GateCompleter,
    input::{LoadFailure, LoadResult},
    model::{BoundingBox, Category, Detection},
    output::LoadTarget,
  };
  use std::{fmt, sync::Mutex};

  #[derive(Debug)]
  struct NoModel;

  impl fmt::Display for NoModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "没有模型")
    }
  }

  impl std::error::Error for NoModel {}

  struct ListEngine {
    detections: Vec<Detection>,
    delay: Duration,
  }

  impl InferenceEngine for ListEngine {
    type Error = NoModel;

    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
      thread::sleep(self.delay);
      Ok(self.detections.clone())
    }
  }

  /// 第一次构造的引擎很慢，之后的很快，用于制造乱序完成
  struct ListBuilder {
    detections: Option<Vec<Detection>>,
    delays: Mutex<Vec<Duration>>,
  }

  impl ListBuilder {
    fn new(detections: Option<Vec<Detection>>) -> Self {
      Self {
        detections,
        delays: Mutex::new(Vec::new()),
      }
    }

    fn with_delays(self, delays: Vec<Duration>) -> Self {
      *self.delays.lock().unwrap() = delays;
      self
    }
  }

  impl EngineBuilder for ListBuilder {
    type Engine = ListEngine;
    type Error = NoModel;

    fn build(&self, _options: &DetectionConfig) -> Result<Self::Engine, Self::Error> {
      let mut delays = self.delays.lock().unwrap();
      let delay = if delays.is_empty() {
        Duration::ZERO
      } else {
        delays.remove(0)
      };
      let detections = self.detections.clone().ok_or(NoModel)?;
      Ok(ListEngine { detections, delay })
    }
  }

  struct MemoryLoader(LoadResult);

  impl ImageLoader for MemoryLoader {
    fn load(&self, _source: &Url, target: LoadTarget, done: GateCompleter<LoadResult>) {
      if let Ok(image) = &self.0 {
        target.show(Arc::clone(image));
      }
      done.complete(self.0.clone());
    }
  }

  /// `slow.png` 加载很慢，其它图像立即完成
  struct UnevenLoader;

  impl ImageLoader for UnevenLoader {
    fn load(&self, source: &Url, target: LoadTarget, done: GateCompleter<LoadResult>) {
      let slow = source.path().ends_with("slow.png");
      thread::spawn(move || {
        let image = if slow {
          thread::sleep(Duration::from_millis(300));
          Arc::new(RgbImage::new(7, 7))
        } else {
          Arc::new(RgbImage::new(3, 3))
        };
        target.show(Arc::clone(&image));
        done.complete(Ok(image));
      });
    }
  }

  struct BrokenEngine;

  impl InferenceEngine for BrokenEngine {
    type Error = NoModel;

    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
      Err(NoModel)
    }
  }

  struct BrokenBuilder;

  impl EngineBuilder for BrokenBuilder {
    type Engine = BrokenEngine;
    type Error = NoModel;

    fn build(&self, _options: &DetectionConfig) -> Result<Self::Engine, Self::Error> {
      Ok(BrokenEngine)
    }
  }

  fn scored(score: f32) -> Detection {
    Detection {
      bounding_box: BoundingBox::new(4.0, 4.0, 20.0, 20.0),
      categories: vec![Category {
        label: "spirochete".into(),
        score,
      }],
    }
  }

  fn source() -> Url {
    Url::parse("image:///sample.png").unwrap()
  }

  fn blank() -> LoadResult {
    Ok(Arc::new(RgbImage::new(32, 32)))
  }

  #[test]
  fn selected_image_is_detected_and_displayed() {
    let detector = SpirocheteDetector::new(ListBuilder::new(Some(vec![scored(0.9), scored(0.2)])));
    let (mut session, rx) =
      DetectionSession::new(MemoryLoader(blank()), detector, DisplaySurface::default());

    let generation = session.select_image(source());
    assert_eq!(
      session.apply_until_current(&rx, Duration::from_secs(5)),
      Some(generation)
    );
    assert_eq!(session.surface().count_text(), "1");
    let shown = session.surface().bitmap().unwrap();
    assert_ne!(*shown, RgbImage::new(32, 32));
  }

  #[test]
  fn stale_results_are_discarded() {
    let builder = ListBuilder::new(Some(vec![scored(0.9)]))
      .with_delays(vec![Duration::from_millis(300), Duration::ZERO]);
    let detector = SpirocheteDetector::new(builder);
    let (mut session, rx) =
      DetectionSession::new(MemoryLoader(blank()), detector, DisplaySurface::default());

    let first = session.select_image(source());
    let second = session.request_detection().unwrap();
    assert!(second > first);

    assert_eq!(
      session.apply_until_current(&rx, Duration::from_secs(5)),
      Some(second)
    );

    // 慢的第一代即使晚到也不会覆盖显示
    let shown = session.surface().bitmap().unwrap();
    if let Ok(late) = rx.recv_timeout(Duration::from_secs(1)) {
      assert_eq!(late.generation, first);
      assert!(!session.apply(late));
    }
    assert!(Arc::ptr_eq(&shown, &session.surface().bitmap().unwrap()));
    assert_eq!(session.surface().count_text(), "1");
  }

  #[test]
  fn superseded_image_never_reaches_display() {
    let detector = SpirocheteDetector::new(ListBuilder::new(Some(Vec::new())));
    let (mut session, rx) =
      DetectionSession::new(UnevenLoader, detector, DisplaySurface::default());

    session.select_image(Url::parse("image:///slow.png").unwrap());
    let current = session.select_image(Url::parse("image:///fast.png").unwrap());
    assert_eq!(
      session.apply_until_current(&rx, Duration::from_secs(5)),
      Some(current)
    );
    assert_eq!(session.surface().bitmap().unwrap().dimensions(), (3, 3));

    thread::sleep(Duration::from_millis(600));
    while let Ok(late) = rx.try_recv() {
      assert!(!session.apply(late));
    }
    assert_eq!(session.surface().bitmap().unwrap().dimensions(), (3, 3));
    assert_eq!(session.surface().count_text(), "0");
  }

  #[test]
  fn inference_error_is_reported_as_failure() {
    let detector = SpirocheteDetector::new(BrokenBuilder);
    let (mut session, rx) =
      DetectionSession::new(MemoryLoader(blank()), detector, DisplaySurface::default());
    session.select_image(source());
    assert!(session.apply_until_current(&rx, Duration::from_secs(5)).is_some());
    assert_eq!(session.surface().count_text(), DETECT_FAILED_TEXT);
  }

  #[test]
  fn missing_model_is_reported_as_unavailable() {
    let detector = SpirocheteDetector::new(ListBuilder::new(None));
    let (mut session, rx) =
      DetectionSession::new(MemoryLoader(blank()), detector, DisplaySurface::default());
    session.select_image(source());
    assert!(session.apply_until_current(&rx, Duration::from_secs(5)).is_some());
    assert_eq!(session.surface().count_text(), MODEL_UNAVAILABLE_TEXT);
  }

  #[test]
  fn image_failure_is_reported_as_unavailable() {
    let detector = SpirocheteDetector::new(ListBuilder::new(Some(vec![scored(0.9)])));
    let (mut session, rx) = DetectionSession::new(
      MemoryLoader(Err(LoadFailure::Decode("坏文件".into()))),
      detector,
      DisplaySurface::default(),
    );
    session.select_image(source());
    assert!(session.apply_until_current(&rx, Duration::from_secs(5)).is_some());
    assert_eq!(session.surface().count_text(), IMAGE_UNAVAILABLE_TEXT);
    assert!(session.surface().bitmap().is_none());
  }

  #[test]
  fn request_without_image_does_nothing() {
    let detector = SpirocheteDetector::new(ListBuilder::new(Some(Vec::new())));
    let (session, _rx) =
      DetectionSession::new(MemoryLoader(blank()), detector, DisplaySurface::default());
    assert_eq!(session.request_detection(), None);
    assert_eq!(session.latest_generation(), 0);
  }

  #[test]
  fn threshold_change_applies_to_next_request() {
    let detector = SpirocheteDetector::new(ListBuilder::new(Some(vec![
      scored(0.9),
      scored(0.6),
      scored(0.4),
    ])));
    let (mut session, rx) =
      DetectionSession::new(MemoryLoader(blank()), detector, DisplaySurface::default());

    session.select_image(source());
    session.apply_until_current(&rx, Duration::from_secs(5));
    assert_eq!(session.surface().count_text(), "3");

    session.set_threshold(0.5);
    session.request_detection();
    session.apply_until_current(&rx, Duration::from_secs(5));
    assert_eq!(session.surface().count_text(), "2");

    session.set_max_results(1);
    session.request_detection();
    session.apply_until_current(&rx, Duration::from_secs(5));
    assert_eq!(session.surface().count_text(), "1");
  }

  struct CollectOutput(Mutex<Vec<usize>>);

  impl Render for &CollectOutput {
    type Error = NoModel;

    fn render_result(
      &self,
      _image: &RgbImage,
      records: &[DetectionRecord],
    ) -> Result<(), Self::Error> {
      self.0.lock().unwrap().push(records.len());
      Ok(())
    }
  }

  #[test]
  fn one_shot_task_renders_detections() {
    let detector = SpirocheteDetector::new(ListBuilder::new(Some(vec![scored(0.9), scored(0.2)])));
    let handle = ImageHandle::load(&MemoryLoader(blank()), source(), &DisplaySurface::default());
    let output = CollectOutput(Mutex::new(Vec::new()));

    let records = OneShotTask::default()
      .run_task(handle, &detector, &output)
      .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(*output.0.lock().unwrap(), vec![1]);
  }
}
