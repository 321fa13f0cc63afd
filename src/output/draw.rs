// 该文件是 Chexun （车巡） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{ImageError, Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;

use crate::{detector::Detection, frame::Frame};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_OFFSET: i32 = 10; // 标签基线在框上方的距离
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const TEXT_COLOR: [u8; 3] = [255, 255, 255]; // 白色

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法加载嵌入的字体文件: {0}")]
  Font(#[from] InvalidFont),
  #[error("图像编码错误: {0}")]
  Encode(#[from] ImageError),
}

pub struct Annotator {
  font: FontArc,
  font_scale: PxScale,
  box_color: Rgb<u8>,
  text_color: Rgb<u8>,
}

impl Annotator {
  pub fn new() -> Result<Self, DrawError> {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data)?;

    Ok(Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(TEXT_COLOR),
    })
  }

  /// 返回带标注的新帧，输入帧保持不变
  pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Frame {
    let mut annotated = frame.clone();
    self.draw_detections(&mut annotated.image, detections);
    annotated
  }

  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      let bbox = &detection.bbox;

      // 加粗为 2 像素
      for t in 0..BOX_THICKNESS {
        let width = bbox.width() - 2 * t;
        let height = bbox.height() - 2 * t;
        if width <= 0 || height <= 0 {
          break;
        }
        let rect = Rect::at(bbox.x1 + t, bbox.y1 + t).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, self.box_color);
      }

      let label = format!("{} {:.2}", detection.class, detection.confidence);
      let text_y = (bbox.y1 - LABEL_OFFSET - LABEL_FONT_SIZE as i32).max(0);
      draw_text_mut(
        image,
        self.text_color,
        bbox.x1.max(0),
        text_y,
        self.font_scale,
        &self.font,
        &label,
      );
    }
  }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, DrawError> {
  let mut jpeg = Vec::new();
  JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(image)?;
  Ok(jpeg)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::{BoundingBox, VehicleClass};

  fn car(bbox: BoundingBox) -> Detection {
    Detection {
      class: VehicleClass::Car,
      confidence: 0.9,
      bbox,
    }
  }

  #[test]
  fn annotate_draws_green_box_and_keeps_input() {
    let annotator = Annotator::new().unwrap();
    let frame = Frame::new(RgbImage::new(100, 100), 0, 0);

    let annotated = annotator.annotate(&frame, &[car(BoundingBox::new(20, 40, 80, 90))]);

    assert_eq!(annotated.image.get_pixel(20, 60), &Rgb(BOX_COLOR));
    assert_eq!(annotated.image.get_pixel(21, 60), &Rgb(BOX_COLOR));
    assert_eq!(annotated.image.get_pixel(50, 60), &Rgb([0, 0, 0]));
    assert_eq!(frame.image.get_pixel(20, 60), &Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_and_out_of_frame_boxes_do_not_panic() {
    let annotator = Annotator::new().unwrap();
    let mut image = RgbImage::new(32, 32);
    annotator.draw_detections(
      &mut image,
      &[
        car(BoundingBox::new(5, 5, 5, 5)),
        car(BoundingBox::new(-10, -10, 200, 200)),
        car(BoundingBox::new(30, 2, 31, 3)),
      ],
    );
  }

  #[test]
  fn jpeg_has_soi_marker() {
    let jpeg = encode_jpeg(&RgbImage::new(16, 16), 80).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
  }
}
