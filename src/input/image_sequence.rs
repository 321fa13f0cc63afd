// 该文件是 Chexun （车巡） 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::InputError,
};

const DEFAULT_FPS: f64 = 25.0;
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// 目录中的图像序列，按文件名排序，逐帧惰性解码
pub struct ImageSequenceInput {
  paths: std::vec::IntoIter<PathBuf>,
  frame_index: u64,
  fps: f64,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for ImageSequenceInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(format!(
        "期望输入方式 '{}', 实际输入方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok())
      .filter(|fps| *fps > 0.0)
      .unwrap_or(DEFAULT_FPS);

    Self::open(crate::url_path(url), fps)
  }
}

impl ImageSequenceInput {
  pub fn open<P: AsRef<Path>>(directory: P, fps: f64) -> Result<Self, InputError> {
    let directory = directory.as_ref();
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      if path.is_file() && is_image_file(&path) {
        paths.push(path);
      }
    }
    paths.sort();

    info!("图像序列 {} 共 {} 帧", directory.display(), paths.len());

    Ok(Self {
      paths: paths.into_iter(),
      frame_index: 0,
      fps,
    })
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

impl Iterator for ImageSequenceInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.paths.next()?;
    debug!("读取图像帧: {}", path.display());

    let image = ImageReader::open(&path)
      .map_err(|e| InputError::SourceRead(format!("{}: {}", path.display(), e)))
      .and_then(|reader| {
        reader
          .decode()
          .map_err(|e| InputError::SourceRead(format!("{}: {}", path.display(), e)))
      });

    let index = self.frame_index;
    self.frame_index += 1;

    Some(image.map(|image| {
      let timestamp_ms = (index as f64 * 1000.0 / self.fps) as u64;
      Frame::new(image.to_rgb8(), index, timestamp_ms)
    }))
  }
}
