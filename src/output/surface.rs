// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/output/surface.rs - 显示面
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

use image::RgbImage;

#[derive(Debug, Default)]
struct SurfaceState {
  bitmap: Option<Arc<RgbImage>>,
  count_text: String,
  load_epoch: u64,
}

/// 显示面：当前显示的图像和计数文本
///
/// 图像整体替换，读者拿到的 `Arc` 不会被后续绘制修改。
#[derive(Debug, Clone, Default)]
pub struct DisplaySurface {
  state: Arc<RwLock<SurfaceState>>,
}

impl DisplaySurface {
  pub fn set_bitmap(&self, bitmap: Arc<RgbImage>) {
    self.write(|state| state.bitmap = Some(bitmap));
  }

  pub fn bitmap(&self) -> Option<Arc<RgbImage>> {
    self.read(|state| state.bitmap.clone())
  }

  pub fn clear(&self) {
    self.write(|state| state.bitmap = None);
  }

  /// 清空显示并开始一次新的加载，之前发出的 [`LoadTarget`] 随之失效
  pub fn begin_load(&self) -> LoadTarget {
    let epoch = self.write(|state| {
      state.bitmap = None;
      state.load_epoch += 1;
      state.load_epoch
    });
    LoadTarget {
      surface: self.clone(),
      epoch,
    }
  }

  pub fn set_count_text(&self, text: impl Into<String>) {
    let text = text.into();
    self.write(|state| state.count_text = text);
  }

  pub fn count_text(&self) -> String {
    self.read(|state| state.count_text.clone())
  }

  fn read<R>(&self, f: impl FnOnce(&SurfaceState) -> R) -> R {
    f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
  }

  fn write<R>(&self, f: impl FnOnce(&mut SurfaceState) -> R) -> R {
    f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
  }
}

/// 加载器把解码好的图像交给显示面的入口
///
/// 只在它对应的加载仍是最新一次时生效，被替换的加载不会再改动显示。
#[derive(Debug, Clone)]
pub struct LoadTarget {
  surface: DisplaySurface,
  epoch: u64,
}

impl LoadTarget {
  /// 返回图像是否真的被显示
  pub fn show(&self, bitmap: Arc<RgbImage>) -> bool {
    self.surface.write(|state| {
      if state.load_epoch != self.epoch {
        return false;
      }
      state.bitmap = Some(bitmap);
      true
    })
  }

  pub fn is_current(&self) -> bool {
    self.surface.read(|state| state.load_epoch == self.epoch)
  }
}
