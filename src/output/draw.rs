// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use thiserror::Error;
use tracing::debug;

use crate::{
  model::{BoundingBox, DetectionRecord},
  output::DisplaySurface,
};

// 边框常量
const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const BOX_STROKE_WIDTH: u32 = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawError {
  #[error("没有可用的图像")]
  NoImage,
}

/// 检测框绘制
///
/// 绘制总是在副本上进行，原图不变。
#[derive(Debug, Clone)]
pub struct Draw {
  color: [u8; 3],
  stroke_width: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      color: BOX_COLOR,
      stroke_width: BOX_STROKE_WIDTH,
    }
  }
}

impl Draw {
  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  pub fn with_stroke_width(mut self, stroke_width: u32) -> Self {
    self.stroke_width = stroke_width;
    self
  }

  pub fn draw_detections(&self, image: &RgbImage, records: &[DetectionRecord]) -> RgbImage {
    let mut boxed = image.clone();
    for record in records {
      self.draw_bbox(&mut boxed, &record.bounding_box);
    }
    debug!("绘制了 {} 个检测框", records.len());
    boxed
  }

  /// 在显示面当前的图像上绘制，显示面为空时报错
  pub fn render_surface(
    &self,
    surface: &DisplaySurface,
    records: &[DetectionRecord],
  ) -> Result<RgbImage, DrawError> {
    let bitmap = surface.bitmap().ok_or(DrawError::NoImage)?;
    Ok(self.draw_detections(&bitmap, records))
  }

  // 线宽以边框为中心向内外各扩展一半，超出图像的部分被裁掉
  fn draw_bbox(&self, image: &mut RgbImage, bbox: &BoundingBox) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }

    let BoundingBox {
      left,
      top,
      right,
      bottom,
    } = *bbox;
    if [left, top, right, bottom].iter().any(|v| v.is_nan()) {
      return;
    }

    // 远在图像外的边收拢到线宽之外
    let margin = self.stroke_width.saturating_add(1) as f32;
    let edge = |v: f32, dim: u32| v.round().clamp(-margin, dim as f32 + margin) as i32;
    let left = edge(left, image.width());
    let top = edge(top, image.height());
    let right = edge(right, image.width());
    let bottom = edge(bottom, image.height());

    if left >= right || top >= bottom {
      return;
    }

    let half = (self.stroke_width / 2) as i32;
    for k in -half..(self.stroke_width as i32 - half) {
      let (x0, y0, x1, y1) = (left - k, top - k, right + k, bottom + k);
      if x0 > x1 || y0 > y1 {
        continue;
      }
      let rect = Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.color));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]))
  }

  fn record(left: f32, top: f32, right: f32, bottom: f32) -> DetectionRecord {
    DetectionRecord {
      bounding_box: BoundingBox::new(left, top, right, bottom),
      label: Some("90".into()),
    }
  }

  #[test]
  fn empty_records_leave_image_unchanged() {
    let image = gradient(64, 48);
    let drawn = Draw::default().draw_detections(&image, &[]);
    assert_eq!(drawn, image);
  }

  #[test]
  fn drawing_is_repeatable_on_copies() {
    let image = gradient(64, 48);
    let records = [record(10.0, 10.0, 40.0, 30.0), record(50.0, 5.0, 80.0, 60.0)];
    let draw = Draw::default();
    let a = draw.draw_detections(&image.clone(), &records);
    let b = draw.draw_detections(&image.clone(), &records);
    assert_eq!(a, b);
    assert_ne!(a, image);
  }

  #[test]
  fn source_image_is_not_modified() {
    let image = gradient(32, 32);
    let before = image.clone();
    let _ = Draw::default().draw_detections(&image, &[record(4.0, 4.0, 20.0, 20.0)]);
    assert_eq!(image, before);
  }

  #[test]
  fn box_outline_is_drawn_but_interior_is_not_filled() {
    let image = RgbImage::new(100, 100);
    let drawn = Draw::default()
      .with_stroke_width(2)
      .draw_detections(&image, &[record(20.0, 20.0, 80.0, 80.0)]);

    assert_eq!(drawn.get_pixel(20, 50), &Rgb(BOX_COLOR));
    assert_eq!(drawn.get_pixel(50, 80), &Rgb(BOX_COLOR));
    assert_eq!(drawn.get_pixel(21, 50), &Rgb(BOX_COLOR));
    assert_eq!(drawn.get_pixel(22, 50), &Rgb([0, 0, 0]));
    assert_eq!(drawn.get_pixel(50, 50), &Rgb([0, 0, 0]));
    assert_eq!(drawn.get_pixel(5, 5), &Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let image = gradient(16, 16);
    let drawn = Draw::default().draw_detections(&image, &[record(8.0, 8.0, 8.0, 12.0)]);
    assert_eq!(drawn, image);
  }

  #[test]
  fn boxes_outside_the_image_are_clipped() {
    let image = RgbImage::new(10, 10);
    let drawn = Draw::default().draw_detections(&image, &[record(-50.0, -50.0, 200.0, 5.0)]);
    assert_eq!(drawn.dimensions(), (10, 10));
    assert_eq!(drawn.get_pixel(3, 5), &Rgb(BOX_COLOR));

    let drawn = Draw::default().draw_detections(&image, &[record(-3e9, -3e9, 3e9, 5.0)]);
    assert_eq!(drawn.get_pixel(3, 5), &Rgb(BOX_COLOR));
    assert_eq!(drawn.get_pixel(3, 0), &Rgb([0, 0, 0]));

    let unbounded = record(f32::NEG_INFINITY, 0.0, f32::INFINITY, 5.0);
    let drawn = Draw::default().draw_detections(&image, &[unbounded]);
    assert_eq!(drawn.get_pixel(5, 0), &Rgb(BOX_COLOR));

    let nan = record(f32::NAN, f32::NAN, 4.0, 4.0);
    assert_eq!(Draw::default().draw_detections(&image, &[nan]), image);
  }

  #[test]
  fn empty_surface_has_no_image() {
    let surface = DisplaySurface::default();
    assert_eq!(
      Draw::default().render_surface(&surface, &[]),
      Err(DrawError::NoImage)
    );

    surface.set_bitmap(Arc::new(gradient(8, 8)));
    assert_eq!(
      Draw::default().render_surface(&surface, &[]).unwrap(),
      gradient(8, 8)
    );
  }
}
