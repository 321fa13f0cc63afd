// 该文件是 Chexun （车巡） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 模型
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

use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameSize},
  model::{ClassRef, DetectItem, DetectResult, Model, ModelError},
};

const YOLOV8_BOX_OFFSET: usize = 4;
const YOLOV8_SCORE_THRESH: f32 = 0.25;
const YOLOV8_NMS_THRESH: f32 = 0.45;

pub struct Yolov8Onnx {
  model: TypedRunnableModel<TypedModel>,
  input_size: FrameSize,
}

impl FromUrlWithScheme for Yolov8Onnx {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for Yolov8Onnx {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    Self::load(&crate::url_path(url), input_size_from_url(url)?)
  }
}

/// 读取 `size=宽x高` 查询参数，缺省为 640x640
fn input_size_from_url(url: &Url) -> Result<FrameSize, ModelError> {
  match url.query_pairs().find(|(k, _)| k == "size") {
    Some((_, size)) => size
      .parse::<FrameSize>()
      .map_err(|e| ModelError::ModelPathError(e.to_string())),
    None => Ok(FrameSize::default()),
  }
}

fn onnx_error<E: std::fmt::Display>(e: E) -> ModelError {
  ModelError::OnnxError(e.to_string())
}

impl Yolov8Onnx {
  pub fn load(path: &str, input_size: FrameSize) -> Result<Self, ModelError> {
    info!("加载模型文件: {}", path);
    let model = tract_onnx::onnx()
      .model_for_path(path)
      .map_err(onnx_error)?
      .with_input_fact(
        0,
        f32::fact([
          1,
          3,
          input_size.height as usize,
          input_size.width as usize,
        ])
        .into(),
      )
      .map_err(onnx_error)?
      .into_optimized()
      .map_err(onnx_error)?
      .into_runnable()
      .map_err(onnx_error)?;
    info!("模型加载完成");

    Ok(Self { model, input_size })
  }

  pub fn input_size(&self) -> FrameSize {
    self.input_size
  }

  fn build_input(&self, frame: &Frame) -> Result<Tensor, ModelError> {
    if frame.width() != self.input_size.width || frame.height() != self.input_size.height {
      return Err(ModelError::OnnxError(format!(
        "帧尺寸 {}x{} 与模型输入 {}x{} 不一致",
        frame.width(),
        frame.height(),
        self.input_size.width,
        self.input_size.height
      )));
    }

    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
      frame.image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });
    Ok(input.into_tensor())
  }

  fn postprocess(&self, output: &Tensor) -> Result<DetectResult, ModelError> {
    let view = output.to_array_view::<f32>().map_err(onnx_error)?;
    let shape = view.shape();
    if shape.len() != 3 || shape[1] <= YOLOV8_BOX_OFFSET {
      return Err(ModelError::OnnxError(format!("意外的输出形状: {:?}", shape)));
    }

    let (channels, anchors) = (shape[1], shape[2]);
    let (w, h) = (
      self.input_size.width as f32,
      self.input_size.height as f32,
    );

    let mut items = Vec::new();
    for a in 0..anchors {
      let (class_id, score) = (YOLOV8_BOX_OFFSET..channels)
        .map(|c| (c - YOLOV8_BOX_OFFSET, view[[0, c, a]]))
        .fold((0, f32::MIN), |max, x| if x.1 > max.1 { x } else { max });

      if score < YOLOV8_SCORE_THRESH {
        continue;
      }

      let (cx, cy, bw, bh) = (view[[0, 0, a]], view[[0, 1, a]], view[[0, 2, a]], view[[0, 3, a]]);
      items.push(DetectItem {
        label: ClassRef::Id(class_id as u32),
        score,
        bbox: [
          ((cx - bw / 2.0) / w).clamp(0.0, 1.0),
          ((cy - bh / 2.0) / h).clamp(0.0, 1.0),
          ((cx + bw / 2.0) / w).clamp(0.0, 1.0),
          ((cy + bh / 2.0) / h).clamp(0.0, 1.0),
        ],
      });
    }

    non_max_suppression(&mut items, YOLOV8_NMS_THRESH);
    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }
}

impl Model for Yolov8Onnx {
  type Input = Frame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensor = self.build_input(input)?;
    let outputs = self.model.run(tvec!(tensor.into())).map_err(onnx_error)?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::OnnxError("模型没有输出".to_string()))?;
    self.postprocess(output)
  }
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  let union = (a[2] - a[0]) * (a[3] - a[1]) + (b[2] - b[0]) * (b[3] - b[1]) - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按置信度降序保留与已保留框 IoU 不超过阈值的框
fn non_max_suppression(items: &mut Vec<DetectItem>, iou_threshold: f32) {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut current_index = 0;
  for index in 0..items.len() {
    let drop = (0..current_index).any(|prev| {
      items[prev].label == items[index].label
        && iou(&items[prev].bbox, &items[index].bbox) > iou_threshold
    });
    if !drop {
      items.swap(current_index, index);
      current_index += 1;
    }
  }
  items.truncate(current_index);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      label: ClassRef::Id(class),
      score,
      bbox,
    }
  }

  #[test]
  fn nms_drops_overlapping_boxes_of_same_class() {
    let mut items = vec![
      item(2, 0.6, [0.10, 0.10, 0.30, 0.30]),
      item(2, 0.9, [0.11, 0.11, 0.31, 0.31]),
      item(7, 0.8, [0.10, 0.10, 0.30, 0.30]),
      item(2, 0.7, [0.60, 0.60, 0.80, 0.80]),
    ];
    non_max_suppression(&mut items, YOLOV8_NMS_THRESH);

    let scores: Vec<f32> = items.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![0.9, 0.8, 0.7]);
  }

  #[test]
  fn input_size_comes_from_query() {
    let url = Url::parse("onnx:///models/yolov8s.onnx?size=320x256").unwrap();
    assert_eq!(input_size_from_url(&url).unwrap(), FrameSize::new(320, 256));

    let url = Url::parse("onnx:///models/yolov8s.onnx").unwrap();
    assert_eq!(input_size_from_url(&url).unwrap(), FrameSize::default());

    let url = Url::parse("onnx:///models/yolov8s.onnx?size=big").unwrap();
    assert!(matches!(
      input_size_from_url(&url),
      Err(ModelError::ModelPathError(_))
    ));
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    assert_eq!(iou(&[0.0, 0.0, 0.1, 0.1], &[0.5, 0.5, 0.6, 0.6]), 0.0);
    assert!((iou(&[0.0, 0.0, 0.2, 0.2], &[0.0, 0.0, 0.2, 0.2]) - 1.0).abs() < 1e-6);
  }
}
