// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/model.rs - 模型
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

use image::RgbImage;

use crate::config::DetectionConfig;

/// 像素坐标下的轴对齐矩形
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "model_replay", derive(serde::Deserialize))]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "model_replay", derive(serde::Deserialize))]
pub struct Category {
  #[cfg_attr(feature = "model_replay", serde(default))]
  pub label: String,
  pub score: f32,
}

/// 推理引擎给出的原始检测结果，每个区域可能带多个候选类别
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "model_replay", derive(serde::Deserialize))]
pub struct Detection {
  pub bounding_box: BoundingBox,
  #[cfg_attr(feature = "model_replay", serde(default))]
  pub categories: Vec<Category>,
}

impl Detection {
  pub fn top_category(&self) -> Option<&Category> {
    self
      .categories
      .iter()
      .max_by(|a, b| a.score.total_cmp(&b.score))
  }

  /// 得分最高的类别的分数，没有类别时为 0
  pub fn score(&self) -> f32 {
    self.top_category().map(|c| c.score).unwrap_or(0.0)
  }
}

/// 交给绘制的检测记录
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
  pub bounding_box: BoundingBox,
  pub label: Option<String>,
}

pub trait InferenceEngine {
  type Error;

  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, Self::Error>;
}

/// 按检测参数构造推理引擎，模型资源缺失时构造失败
pub trait EngineBuilder {
  type Engine: InferenceEngine;
  type Error;

  fn build(&self, options: &DetectionConfig) -> Result<Self::Engine, Self::Error>;
}

mod detector;
pub use self::detector::{DetectError, SpirocheteDetector, normalize_detections, score_label};

#[cfg(feature = "model_replay")]
mod replay;
#[cfg(feature = "model_replay")]
pub use self::replay::{ReplayEngine, ReplayEngineBuilder, ReplayEngineError};
