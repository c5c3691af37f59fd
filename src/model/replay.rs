// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/model/replay.rs - 回放推理引擎
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

//! 从 JSON 文件回放预先计算好的检测结果的推理引擎。
//!
//! 文件内容为检测区域数组：
//!
//! ```json
//! [{"bounding_box": {"left": 1, "top": 2, "right": 30, "bottom": 40},
//!   "categories": [{"label": "spirochete", "score": 0.91}]}]
//! ```

use std::{path::PathBuf, sync::Arc};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::DetectionConfig,
  model::{Detection, EngineBuilder, InferenceEngine},
  url_to_path,
};

const REPLAY_SCHEME: &str = "replay";

#[derive(Error, Debug)]
pub enum ReplayEngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(#[from] serde_json::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

#[derive(Debug, Clone)]
enum ReplaySource {
  File(PathBuf),
  Memory(Arc<[Detection]>),
}

#[derive(Debug, Clone)]
pub struct ReplayEngineBuilder {
  source: ReplaySource,
}

impl FromUrlWithScheme for ReplayEngineBuilder {
  const SCHEME: &'static str = REPLAY_SCHEME;
}

impl FromUrl for ReplayEngineBuilder {
  type Error = ReplayEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayEngineError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(Self {
      source: ReplaySource::File(url_to_path(url)),
    })
  }
}

impl ReplayEngineBuilder {
  pub fn from_detections(detections: impl Into<Arc<[Detection]>>) -> Self {
    Self {
      source: ReplaySource::Memory(detections.into()),
    }
  }
}

impl EngineBuilder for ReplayEngineBuilder {
  type Engine = ReplayEngine;
  type Error = ReplayEngineError;

  fn build(&self, options: &DetectionConfig) -> Result<Self::Engine, Self::Error> {
    let detections: Arc<[Detection]> = match &self.source {
      ReplaySource::File(path) => {
        info!("加载模型文件: {}", path.display());
        let data = std::fs::read(path)?;
        let detections: Vec<Detection> = serde_json::from_slice(&data)?;
        debug!("模型文件包含 {} 个检测区域", detections.len());
        detections.into()
      }
      ReplaySource::Memory(detections) => Arc::clone(detections),
    };

    Ok(ReplayEngine {
      detections,
      options: *options,
    })
  }
}

/// 与引擎端的配置一致：按阈值过滤并按最大数量截断
#[derive(Debug, Clone)]
pub struct ReplayEngine {
  detections: Arc<[Detection]>,
  options: DetectionConfig,
}

impl InferenceEngine for ReplayEngine {
  type Error = ReplayEngineError;

  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    debug!("回放检测结果，图像大小 {}x{}", image.width(), image.height());
    let limit = self.options.max_results.unwrap_or(usize::MAX);
    Ok(
      self
        .detections
        .iter()
        .filter(|d| d.score() >= self.options.score_threshold)
        .take(limit)
        .cloned()
        .collect(),
    )
  }
}
