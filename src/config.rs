// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/config.rs - 检测参数配置
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

use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

pub const DEFAULT_THRESHOLD: f32 = 0.3;

/// 检测参数
///
/// 数值不做校验，越界的阈值原样交给推理引擎。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionConfig {
  pub score_threshold: f32,
  pub max_results: Option<usize>,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      score_threshold: DEFAULT_THRESHOLD,
      max_results: None,
    }
  }
}

impl DetectionConfig {
  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn with_max_results(mut self, max_results: Option<usize>) -> Self {
    self.max_results = max_results;
    self
  }

  pub fn set_threshold(&mut self, threshold: f32) {
    self.score_threshold = threshold;
  }

  pub fn set_max_results(&mut self, count: usize) {
    self.max_results = Some(count);
  }
}

/// 可在线程间共享的检测参数，每次检测开始时取一份快照
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
  inner: Arc<RwLock<DetectionConfig>>,
}

impl From<DetectionConfig> for SharedConfig {
  fn from(config: DetectionConfig) -> Self {
    Self {
      inner: Arc::new(RwLock::new(config)),
    }
  }
}

impl SharedConfig {
  pub fn snapshot(&self) -> DetectionConfig {
    // 配置是纯数据，锁中毒时直接沿用其中的值
    *self.inner.read().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn set_threshold(&self, threshold: f32) {
    debug!("更新置信度阈值: {}", threshold);
    self
      .inner
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .set_threshold(threshold);
  }

  pub fn set_max_results(&self, count: usize) {
    debug!("更新最大检测数量: {}", count);
    self
      .inner
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .set_max_results(count);
  }
}
