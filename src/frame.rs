// 该文件是 Chexun （车巡） 项目的一部分。
// src/frame.rs - 帧定义
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

use std::str::FromStr;

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引（从 0 开始）
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 推理尺寸
///
/// 推理、标注与推流都在该尺寸的坐标系下进行，检测框坐标以此为准。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
  pub width: u32,
  pub height: u32,
}

impl FrameSize {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

impl Default for FrameSize {
  fn default() -> Self {
    Self::new(640, 640)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("无效的尺寸 '{0}'，应为 宽x高，例如 640x640")]
pub struct ParseFrameSizeError(String);

/// 解析 `宽x高`，宽高都必须大于 0
impl FromStr for FrameSize {
  type Err = ParseFrameSizeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ParseFrameSizeError(s.to_string());
    let (width, height) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let width = width.trim().parse::<u32>().map_err(|_| invalid())?;
    let height = height.trim().parse::<u32>().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
      return Err(invalid());
    }
    Ok(Self::new(width, height))
  }
}

/// 缩放帧到推理尺寸，保留索引与时间戳
pub fn resize_frame(frame: &Frame, size: FrameSize) -> Frame {
  let image = if frame.width() == size.width && frame.height() == size.height {
    frame.image.clone()
  } else {
    image::imageops::resize(&frame.image, size.width, size.height, FilterType::Triangle)
  };

  Frame {
    image,
    index: frame.index,
    timestamp_ms: frame.timestamp_ms,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resize_keeps_frame_identity() {
    let frame = Frame::new(RgbImage::new(1280, 720), 7, 280);
    let resized = resize_frame(&frame, FrameSize::default());
    assert_eq!((resized.width(), resized.height()), (640, 640));
    assert_eq!(resized.index, 7);
    assert_eq!(resized.timestamp_ms, 280);
  }

  #[test]
  fn frame_size_parses_width_by_height() {
    assert_eq!("640x480".parse::<FrameSize>(), Ok(FrameSize::new(640, 480)));
    assert_eq!(" 320X320 ".parse::<FrameSize>(), Ok(FrameSize::new(320, 320)));
    assert!("640".parse::<FrameSize>().is_err());
    assert!("0x640".parse::<FrameSize>().is_err());
    assert!("axb".parse::<FrameSize>().is_err());
  }

  #[test]
  fn resize_is_noop_for_matching_size() {
    let mut image = RgbImage::new(4, 4);
    image.put_pixel(1, 1, image::Rgb([9, 8, 7]));
    let frame = Frame::new(image, 0, 0);
    let resized = resize_frame(&frame, FrameSize::new(4, 4));
    assert_eq!(resized.image.get_pixel(1, 1), &image::Rgb([9, 8, 7]));
  }
}
