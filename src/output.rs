// 该文件是 Chexun （车巡） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::{detector::Detection, frame::Frame};

/// 把一帧的检测结果渲染为新的输出
pub trait Render<F, R: ?Sized> {
  type Output;
  type Error;
  fn render_result(&self, frame: &F, result: &R) -> Result<Self::Output, Self::Error>;
}

pub mod draw;
pub use self::draw::{Annotator, DrawError, encode_jpeg};

mod multipart;
pub use self::multipart::{EncodedFrame, MULTIPART_BOUNDARY, MULTIPART_CONTENT_TYPE};

/// 标注并编码：流水线中每帧输出的最后一步
pub struct FrameEncoder {
  annotator: Annotator,
  quality: u8,
}

impl FrameEncoder {
  pub fn new(annotator: Annotator, quality: u8) -> Self {
    Self { annotator, quality }
  }

  pub fn annotator(&self) -> &Annotator {
    &self.annotator
  }
}

impl Render<Frame, [Detection]> for FrameEncoder {
  type Output = EncodedFrame;
  type Error = DrawError;

  fn render_result(&self, frame: &Frame, result: &[Detection]) -> Result<EncodedFrame, DrawError> {
    let annotated = self.annotator.annotate(frame, result);
    let jpeg = encode_jpeg(&annotated.image, self.quality)?;
    Ok(EncodedFrame {
      index: frame.index,
      jpeg,
    })
  }
}
