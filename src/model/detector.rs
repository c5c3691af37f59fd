// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/model/detector.rs - 螺旋体检测调用
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

use std::time::{Duration, Instant};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  config::{DetectionConfig, SharedConfig},
  input::{ImageHandle, LoadFailure},
  model::{Detection, DetectionRecord, EngineBuilder, InferenceEngine},
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("图像不可用: {0}")]
  ImageUnavailable(#[from] LoadFailure),
  #[error("检测不可用，模型加载失败: {0}")]
  ModelUnavailable(#[source] BoxError),
  #[error("推理错误: {0}")]
  Inference(#[source] BoxError),
}

impl DetectError {
  /// 模型或图像不可用，区别于“没有检测到目标”
  pub fn is_unavailable(&self) -> bool {
    matches!(
      self,
      DetectError::ImageUnavailable(_) | DetectError::ModelUnavailable(_)
    )
  }
}

pub struct SpirocheteDetector<B> {
  builder: B,
  config: SharedConfig,
}

impl<B> SpirocheteDetector<B> {
  pub fn new(builder: B) -> Self {
    Self {
      builder,
      config: SharedConfig::default(),
    }
  }

  pub fn with_config(mut self, config: SharedConfig) -> Self {
    self.config = config;
    self
  }

  pub fn config(&self) -> &SharedConfig {
    &self.config
  }

  pub fn set_threshold(&self, threshold: f32) {
    self.config.set_threshold(threshold);
  }

  pub fn set_max_results(&self, count: usize) {
    self.config.set_max_results(count);
  }
}

impl<B> SpirocheteDetector<B>
where
  B: EngineBuilder,
  B::Error: std::error::Error + Send + Sync + 'static,
  <B::Engine as InferenceEngine>::Error: std::error::Error + Send + Sync + 'static,
{
  /// 等待图像就绪后检测螺旋体
  ///
  /// 参数在调用开始时取快照，之后对配置的修改不影响本次检测。
  pub fn run_object_detection(
    &self,
    image: &ImageHandle,
    timeout: Duration,
  ) -> Result<Vec<DetectionRecord>, DetectError> {
    let options = self.config.snapshot();
    let bitmap = image.image(timeout)?;
    self.detect_image(&bitmap, &options)
  }

  pub fn detect_image(
    &self,
    image: &RgbImage,
    options: &DetectionConfig,
  ) -> Result<Vec<DetectionRecord>, DetectError> {
    debug!("检测参数: {:?}", options);
    let engine = self.builder.build(options).map_err(|e| {
      error!("模型加载失败: {}", e);
      DetectError::ModelUnavailable(Box::new(e))
    })?;

    let now = Instant::now();
    let detections = engine
      .detect(image)
      .map_err(|e| DetectError::Inference(Box::new(e)))?;
    info!(
      "推理完成，耗时: {:.2?}，引擎返回 {} 个区域",
      now.elapsed(),
      detections.len()
    );

    let records = normalize_detections(detections, options);
    info!("检测到 {} 个螺旋体", records.len());
    Ok(records)
  }
}

/// 先按阈值过滤，再按最大数量截断，保留引擎给出的顺序
pub fn normalize_detections(
  detections: Vec<Detection>,
  options: &DetectionConfig,
) -> Vec<DetectionRecord> {
  let limit = options.max_results.unwrap_or(usize::MAX);
  detections
    .into_iter()
    .filter(|detection| detection.score() >= options.score_threshold)
    .take(limit)
    .map(|detection| DetectionRecord {
      label: detection.top_category().map(|c| score_label(c.score)),
      bounding_box: detection.bounding_box,
    })
    .collect()
}

/// 分数显示为整数百分比，截断小数
pub fn score_label(score: f32) -> String {
  ((score * 100.0) as i32).to_string()
}
