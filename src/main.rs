// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use spirocount::{
  FromUrl,
  config::DetectionConfig,
  input::{ImageFileLoader, ImageHandle},
  model::{ReplayEngineBuilder, SpirocheteDetector},
  output::{DisplaySurface, OutputWrapper},
  task::{OneShotTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("置信度阈值: {}", args.threshold);

  let config = DetectionConfig::default()
    .with_threshold(args.threshold)
    .with_max_results(args.max_results);
  let detector =
    SpirocheteDetector::new(ReplayEngineBuilder::from_url(&args.model)?).with_config(config.into());
  let loader = ImageFileLoader::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let surface = DisplaySurface::default();
  let image = ImageHandle::load(&loader, args.input.clone(), &surface);

  let records = OneShotTask::default()
    .with_timeout(Duration::from_millis(args.timeout_ms))
    .run_task(image, &detector, output)?;

  for record in &records {
    let b = &record.bounding_box;
    info!(
      "  - {}% at ({:.0}, {:.0}, {:.0}, {:.0})",
      record.label.as_deref().unwrap_or("-"),
      b.left,
      b.top,
      b.right,
      b.bottom
    );
  }
  println!("{}", records.len());

  Ok(())
}
