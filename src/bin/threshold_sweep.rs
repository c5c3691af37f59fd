// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/bin/threshold_sweep.rs - 阈值扫描
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

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use spirocount::{
  FromUrl,
  input::ImageFileLoader,
  model::{ReplayEngineBuilder, SpirocheteDetector},
  output::DisplaySurface,
  task::DetectionSession,
};

/// 像拖动阈值滑块一样，对同一张图像按一组阈值反复检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 阈值列表
  #[arg(
    long,
    value_delimiter = ',',
    default_value = "0.1,0.2,0.3,0.4,0.5,0.6,0.7,0.8,0.9"
  )]
  pub thresholds: Vec<f32>,
  /// 一次性发出所有请求，只显示最后一次的结果
  #[arg(long)]
  pub burst: bool,
  /// 保存最终显示的图像
  #[arg(long, value_name = "FILE")]
  pub save: Option<std::path::PathBuf>,
}

const WAIT: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let detector = SpirocheteDetector::new(ReplayEngineBuilder::from_url(&args.model)?);
  let loader = ImageFileLoader::from_url(&args.input)?;
  let (mut session, updates) = DetectionSession::new(loader, detector, DisplaySurface::default());

  session.select_image(args.input.clone());
  session.apply_until_current(&updates, WAIT);
  info!("初始结果: {}", session.surface().count_text());

  if args.burst {
    for &threshold in &args.thresholds {
      session.set_threshold(threshold);
      session.request_detection();
    }
    match session.apply_until_current(&updates, WAIT) {
      Some(generation) => info!(
        "第 {} 代结果已显示: {}",
        generation,
        session.surface().count_text()
      ),
      None => warn!("没有收到最新结果"),
    }
  } else {
    let mut previous: Option<usize> = None;
    for &threshold in &args.thresholds {
      session.set_threshold(threshold);
      session.request_detection();
      session.apply_until_current(&updates, WAIT);
      let text = session.surface().count_text();
      println!("{:.2}\t{}", threshold, text);

      if let (Ok(count), Some(prev)) = (text.parse::<usize>(), previous)
        && count > prev
        && args.thresholds.is_sorted()
      {
        warn!("阈值升高后检测数量反而增加: {} -> {}", prev, count);
      }
      previous = text.parse().ok();
    }
  }

  if let Some(path) = args.save
    && let Some(bitmap) = session.surface().bitmap()
  {
    bitmap.save(&path)?;
    info!("保存图像到文件: {}", path.display());
  }

  Ok(())
}
