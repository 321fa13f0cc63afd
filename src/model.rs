// 该文件是 Chexun （车巡） 项目的一部分。
// src/model.rs - 模型
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

use std::path::Path;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl,
  frame::{Frame, FrameSize},
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 模型输出的类别引用，由类别表解析为名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassRef {
  Id(u32),
  Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub label: ClassRef,
  pub score: f32,
  pub bbox: [f32; 4], // 归一化坐标 [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 类别名称表，行号即模型类别 ID
#[derive(Debug, Clone, Default)]
pub struct ClassList {
  names: Vec<String>,
}

impl ClassList {
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let list = Self::parse(&content);
    info!(
      "从 {} 加载 {} 个类别名称",
      path.as_ref().display(),
      list.len()
    );
    Ok(list)
  }

  pub fn parse(content: &str) -> Self {
    Self {
      names: content.lines().map(|line| line.trim().to_string()).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, id: u32) -> Option<&str> {
    self.names.get(id as usize).map(String::as_str)
  }

  pub fn resolve<'a>(&'a self, label: &'a ClassRef) -> Option<&'a str> {
    match label {
      ClassRef::Id(id) => self.name(*id),
      ClassRef::Name(name) => Some(name.as_str()),
    }
  }
}

impl<S: Into<String>> FromIterator<S> for ClassList {
  fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("检测记录格式错误 {file}:{line}: {reason}")]
  RecordFormat {
    file: String,
    line: usize,
    reason: String,
  },
  #[cfg(feature = "model_onnx")]
  #[error("ONNX 推理错误: {0}")]
  OnnxError(String),
}

mod recorded;
pub use self::recorded::RecordedModel;

#[cfg(feature = "model_onnx")]
mod yolov8;
#[cfg(feature = "model_onnx")]
pub use self::yolov8::Yolov8Onnx;

pub enum ModelWrapper {
  Recorded(RecordedModel),
  #[cfg(feature = "model_onnx")]
  Yolov8Onnx(Box<Yolov8Onnx>),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    if url.scheme() == RecordedModel::SCHEME {
      return Ok(ModelWrapper::Recorded(RecordedModel::from_url(url)?));
    }
    #[cfg(feature = "model_onnx")]
    {
      if url.scheme() == Yolov8Onnx::SCHEME {
        return Ok(ModelWrapper::Yolov8Onnx(Box::new(Yolov8Onnx::from_url(url)?)));
      }
    }
    Err(ModelError::ModelPathError(format!(
      "不支持的模型方案: {}",
      url.scheme()
    )))
  }
}

impl ModelWrapper {
  /// 模型要求的固定输入尺寸，回放记录没有要求
  pub fn input_size(&self) -> Option<FrameSize> {
    match self {
      ModelWrapper::Recorded(_) => None,
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Yolov8Onnx(model) => Some(model.input_size()),
    }
  }
}

impl Model for ModelWrapper {
  type Input = Frame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      ModelWrapper::Recorded(model) => model.infer(input),
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Yolov8Onnx(model) => model.infer(input),
    }
  }
}
