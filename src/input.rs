// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/input.rs - 图像输入
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

use std::{sync::Arc, time::Duration};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  gate::{GateCompleter, GateError, ReadinessGate},
  output::{DisplaySurface, LoadTarget},
};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{DEFAULT_IMAGE_SIZE, ImageFileLoader, decode_image_file};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的参数: {0}")]
  InvalidArgument(String),
  #[error("I/O 错误: {0}")]
  Io(String),
  #[error("图像解码错误: {0}")]
  Decode(String),
  #[error("等待图像超时: {0:?}")]
  Timeout(Duration),
  #[error("图像加载被中断")]
  Abandoned,
}

impl From<GateError> for LoadFailure {
  fn from(err: GateError) -> Self {
    match err {
      GateError::Timeout(timeout) => LoadFailure::Timeout(timeout),
      GateError::Abandoned => LoadFailure::Abandoned,
    }
  }
}

pub type LoadResult = Result<Arc<RgbImage>, LoadFailure>;

/// 异步图像加载器
///
/// 实现者必须在加载结束后恰好完成一次 `done`，成功时先通过 `target` 显示图像。
pub trait ImageLoader {
  fn load(&self, source: &Url, target: LoadTarget, done: GateCompleter<LoadResult>);
}

impl<L: ImageLoader + ?Sized> ImageLoader for Arc<L> {
  fn load(&self, source: &Url, target: LoadTarget, done: GateCompleter<LoadResult>) {
    (**self).load(source, target, done)
  }
}

/// 一次选图或拍照产生的图像句柄，下一次选择会产生新的句柄而不是修改旧的
#[derive(Debug, Clone)]
pub struct ImageHandle {
  source: Url,
  surface: DisplaySurface,
  gate: ReadinessGate<LoadResult>,
}

impl ImageHandle {
  pub fn load<L: ImageLoader + ?Sized>(loader: &L, source: Url, surface: &DisplaySurface) -> Self {
    info!("加载图像: {}", source);
    let target = surface.begin_load();
    let (gate, completer) = ReadinessGate::new();
    loader.load(&source, target, completer);
    Self {
      source,
      surface: surface.clone(),
      gate,
    }
  }

  pub fn source(&self) -> &Url {
    &self.source
  }

  pub fn surface(&self) -> &DisplaySurface {
    &self.surface
  }

  pub fn is_ready(&self) -> bool {
    self.gate.is_available()
  }

  /// 阻塞直到图像加载完成或超时
  pub fn image(&self, timeout: Duration) -> LoadResult {
    let result = self.gate.wait_timeout(timeout)?;
    debug!("图像就绪: {} ({})", self.source, result.is_ok());
    result
  }
}
