// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/output/directory_record.rs - 按日期归档的目录记录输出
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{Datelike, Utc};
use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectionRecord,
  output::{Render, draw::Draw},
  url_to_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 检测记录文本，每行 `分数, left, top, right, bottom`
pub struct Record;

impl Record {
  pub fn record(&self, records: &[DetectionRecord], path: &Path) -> Result<(), std::io::Error> {
    let lines: Vec<String> = records
      .iter()
      .map(|r| {
        let b = &r.bounding_box;
        format!(
          "{}, {:.1}, {:.1}, {:.1}, {:.1}",
          r.label.as_deref().unwrap_or("-"),
          b.left,
          b.top,
          b.right,
          b.bottom
        )
      })
      .collect();
    std::fs::write(path.with_extension("txt"), lines.join("\n"))
  }
}

/// `folder:///dir[?record][&always]`
///
/// `record` 时额外写出同名文本记录，`always` 时没有检测结果也保存图像。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  record: Option<Record>,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri.query_pairs().any(|(k, _)| k == "record");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: url_to_path(uri),
      draw: Draw::default(),
      record: record.then_some(Record),
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    image: &RgbImage,
    records: &[DetectionRecord],
  ) -> Result<(), Self::Error> {
    if !self.always && records.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    self.draw.draw_detections(image, records).save(&path)?;
    if let Some(record) = &self.record {
      record.record(records, &path)?;
    }
    info!("记录检测结果: {}", path.display());
    Ok(())
  }
}
