// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{path::Path, sync::Arc, thread};

use image::{ImageReader, RgbImage, imageops::FilterType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  gate::GateCompleter,
  input::{ImageLoader, LoadFailure, LoadResult},
  output::LoadTarget,
  url_to_path,
};

/// 加载后图像长边的上限
pub const DEFAULT_IMAGE_SIZE: u32 = 960;

const READ_IMAGE_FILE_SCHEME: &str = "image";
const FILE_SCHEME: &str = "file";

/// 在后台线程解码图像文件的加载器
#[derive(Debug, Clone)]
pub struct ImageFileLoader {
  max_size: u32,
}

impl Default for ImageFileLoader {
  fn default() -> Self {
    Self {
      max_size: DEFAULT_IMAGE_SIZE,
    }
  }
}

impl FromUrlWithScheme for ImageFileLoader {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl FromUrl for ImageFileLoader {
  type Error = LoadFailure;

  /// `image:///path?size=960`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url)?;
    let mut loader = Self::default();
    for (k, v) in url.query_pairs() {
      if k == "size" {
        loader.max_size = v
          .parse()
          .map_err(|_| LoadFailure::InvalidArgument(format!("size={}", v)))?;
      }
    }
    Ok(loader)
  }
}

impl ImageFileLoader {
  pub fn with_max_size(mut self, max_size: u32) -> Self {
    self.max_size = max_size;
    self
  }

  pub fn max_size(&self) -> u32 {
    self.max_size
  }
}

fn check_scheme(url: &Url) -> Result<(), LoadFailure> {
  if url.scheme() != READ_IMAGE_FILE_SCHEME && url.scheme() != FILE_SCHEME {
    error!(
      "URI scheme mismatch: expected '{}', found '{}'",
      READ_IMAGE_FILE_SCHEME,
      url.scheme()
    );
    return Err(LoadFailure::SchemeMismatch(url.scheme().to_string()));
  }
  Ok(())
}

/// 解码图像文件并等比缩小到 `max_size` 以内，不放大
pub fn decode_image_file(path: &Path, max_size: u32) -> Result<RgbImage, LoadFailure> {
  let image = ImageReader::open(path)
    .map_err(|e| LoadFailure::Io(e.to_string()))?
    .with_guessed_format()
    .map_err(|e| LoadFailure::Io(e.to_string()))?
    .decode()
    .map_err(|e| LoadFailure::Decode(e.to_string()))?;

  let (width, height) = (image.width(), image.height());
  let image = if max_size > 0 && (width > max_size || height > max_size) {
    debug!("缩放图像 {}x{} 到 {} 以内", width, height, max_size);
    image.resize(max_size, max_size, FilterType::Triangle)
  } else {
    image
  };

  Ok(image.into_rgb8())
}

impl ImageLoader for ImageFileLoader {
  fn load(&self, source: &Url, target: LoadTarget, done: GateCompleter<LoadResult>) {
    if let Err(e) = check_scheme(source) {
      done.complete(Err(e));
      return;
    }

    let path = url_to_path(source);
    let max_size = self.max_size;
    thread::spawn(move || {
      let result = decode_image_file(&path, max_size).map(Arc::new);
      match &result {
        Ok(image) => {
          info!(
            "图像加载完成: {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
          );
          if !target.show(Arc::clone(image)) {
            debug!("图像已被新的选择替换，不再显示: {}", path.display());
          }
        }
        Err(e) => error!("图像加载失败: {}: {}", path.display(), e),
      }
      done.complete(result);
    });
  }
}
