// 该文件是 Chexun （车巡） 项目的一部分。
// src/detector.rs - 车辆检测适配层
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

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{Frame, FrameSize, resize_frame},
  model::{ClassList, DetectResult, Model},
};

/// 关注的车辆类别，判别值即统计输出中使用的类别编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
  Car = 0,
  Truck = 1,
  Bus = 2,
  Motorcycle = 3,
}

impl VehicleClass {
  pub const ALL: [VehicleClass; 4] = [
    VehicleClass::Car,
    VehicleClass::Truck,
    VehicleClass::Bus,
    VehicleClass::Motorcycle,
  ];

  pub fn code(self) -> u8 {
    self as u8
  }

  pub fn from_code(code: u8) -> Option<Self> {
    Self::ALL.get(code as usize).copied()
  }

  /// 模型类别名称
  pub fn label(self) -> &'static str {
    match self {
      VehicleClass::Car => "car",
      VehicleClass::Truck => "truck",
      VehicleClass::Bus => "bus",
      VehicleClass::Motorcycle => "motorcycle",
    }
  }

  pub fn from_label(label: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|class| class.label() == label)
  }

  /// 图表与报告中的显示名称
  pub fn display_name(self) -> &'static str {
    match self {
      VehicleClass::Car => "Autos",
      VehicleClass::Truck => "Camiones",
      VehicleClass::Bus => "Buses",
      VehicleClass::Motorcycle => "Motocicletas",
    }
  }
}

impl fmt::Display for VehicleClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// 推理尺寸坐标系下的像素框
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl BoundingBox {
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  /// 归一化坐标按截断取整映射到像素坐标
  pub fn from_normalized(bbox: &[f32; 4], size: FrameSize) -> Self {
    let (w, h) = (size.width as f32, size.height as f32);
    Self {
      x1: (bbox[0] * w) as i32,
      y1: (bbox[1] * h) as i32,
      x2: (bbox[2] * w) as i32,
      y2: (bbox[3] * h) as i32,
    }
  }

  pub fn width(&self) -> i32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> i32 {
    self.y2 - self.y1
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class: VehicleClass,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
  /// 严格大于该值的结果才会保留
  pub threshold: f32,
  pub targets: Vec<VehicleClass>,
  pub input_size: FrameSize,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      threshold: 0.5,
      targets: VehicleClass::ALL.to_vec(),
      input_size: FrameSize::default(),
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型未加载")]
  ModelNotLoaded,
  #[error("模型推理错误: {0}")]
  Model(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 一次检测的结果：缩放后的帧及其检测
#[derive(Debug, Clone)]
pub struct DetectedFrame {
  pub frame: Frame,
  pub detections: Vec<Detection>,
}

pub struct VehicleDetector<M> {
  model: Option<M>,
  classes: ClassList,
  config: DetectorConfig,
}

impl<M> VehicleDetector<M> {
  pub fn new(classes: ClassList, config: DetectorConfig) -> Self {
    Self {
      model: None,
      classes,
      config,
    }
  }

  pub fn with_model(mut self, model: M) -> Self {
    self.model = Some(model);
    self
  }

  pub fn attach(&mut self, model: M) {
    self.model = Some(model);
  }

  pub fn is_loaded(&self) -> bool {
    self.model.is_some()
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  /// 保留目标类别且置信度高于阈值的结果，其余静默丢弃
  pub fn filter(&self, result: &DetectResult) -> Vec<Detection> {
    result
      .items
      .iter()
      .filter_map(|item| {
        let class = self
          .classes
          .resolve(&item.label)
          .and_then(VehicleClass::from_label)?;
        if !self.config.targets.contains(&class) || item.score <= self.config.threshold {
          return None;
        }
        Some(Detection {
          class,
          confidence: item.score,
          bbox: BoundingBox::from_normalized(&item.bbox, self.config.input_size),
        })
      })
      .collect()
  }
}

impl<M, E> VehicleDetector<M>
where
  M: Model<Input = Frame, Output = DetectResult, Error = E>,
  E: std::error::Error + Send + Sync + 'static,
{
  pub fn detect(&self, frame: &Frame) -> Result<DetectedFrame, DetectorError> {
    let model = self.model.as_ref().ok_or(DetectorError::ModelNotLoaded)?;

    let resized = resize_frame(frame, self.config.input_size);
    let result = model
      .infer(&resized)
      .map_err(|e| DetectorError::Model(Box::new(e)))?;
    let detections = self.filter(&result);

    debug!(
      "帧 {}: 模型输出 {} 个, 保留 {} 个",
      frame.index,
      result.len(),
      detections.len()
    );

    Ok(DetectedFrame {
      frame: resized,
      detections,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{ClassRef, DetectItem};
  use image::RgbImage;

  struct FixedModel(Vec<DetectItem>);

  impl Model for FixedModel {
    type Input = Frame;
    type Output = DetectResult;
    type Error = std::io::Error;

    fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
      assert_eq!((input.width(), input.height()), (640, 640));
      Ok(DetectResult::from(self.0.clone()))
    }
  }

  fn item(label: ClassRef, score: f32) -> DetectItem {
    DetectItem {
      label,
      score,
      bbox: [0.1, 0.2, 0.5, 0.75],
    }
  }

  fn classes() -> ClassList {
    ["person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck"]
      .into_iter()
      .collect()
  }

  #[test]
  fn class_codes_are_stable() {
    for class in VehicleClass::ALL {
      assert_eq!(VehicleClass::from_code(class.code()), Some(class));
      assert_eq!(VehicleClass::from_label(class.label()), Some(class));
    }
    assert_eq!(VehicleClass::Car.code(), 0);
    assert_eq!(VehicleClass::Motorcycle.code(), 3);
    assert_eq!(VehicleClass::from_code(4), None);
    assert_eq!(VehicleClass::from_label("bicycle"), None);
  }

  #[test]
  fn detect_without_model_fails() {
    let detector: VehicleDetector<FixedModel> =
      VehicleDetector::new(classes(), DetectorConfig::default());
    let frame = Frame::new(RgbImage::new(32, 32), 0, 0);
    assert!(matches!(
      detector.detect(&frame),
      Err(DetectorError::ModelNotLoaded)
    ));
  }

  #[test]
  fn detect_filters_by_class_and_threshold() {
    let model = FixedModel(vec![
      item(ClassRef::Id(2), 0.9),
      item(ClassRef::Id(1), 0.95),
      item(ClassRef::Id(2), 0.4),
      item(ClassRef::Id(7), 0.5),
      item(ClassRef::Name("bus".to_string()), 0.51),
      item(ClassRef::Id(42), 0.99),
    ]);
    let detector =
      VehicleDetector::new(classes(), DetectorConfig::default()).with_model(model);

    let frame = Frame::new(RgbImage::new(1280, 720), 3, 120);
    let detected = detector.detect(&frame).unwrap();

    assert_eq!((detected.frame.width(), detected.frame.height()), (640, 640));
    assert_eq!(detected.frame.index, 3);
    let classes: Vec<_> = detected.detections.iter().map(|d| d.class).collect();
    assert_eq!(classes, vec![VehicleClass::Car, VehicleClass::Bus]);
    assert!(detected.detections.iter().all(|d| d.confidence > 0.5));
    assert_eq!(detected.detections[0].bbox, BoundingBox::new(64, 128, 320, 480));
  }

  #[test]
  fn target_subset_is_honoured() {
    let config = DetectorConfig {
      targets: vec![VehicleClass::Truck],
      ..DetectorConfig::default()
    };
    let model = FixedModel(vec![item(ClassRef::Id(2), 0.9), item(ClassRef::Id(7), 0.8)]);
    let detector = VehicleDetector::new(classes(), config).with_model(model);

    let detected = detector.detect(&Frame::new(RgbImage::new(8, 8), 0, 0)).unwrap();
    assert_eq!(detected.detections.len(), 1);
    assert_eq!(detected.detections[0].class, VehicleClass::Truck);
  }
}
