// 该文件是 Chexun （车巡） 项目的一部分。
// src/model/recorded.rs - 检测记录回放模型
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

//! 按帧回放预先记录的检测结果。
//!
//! 目录中每帧一个文本文件 `{index:06}.txt`，每行一个检测：
//!
//! ```text
//! car, 0.9134, 0.1200, 0.3000, 0.2500, 0.4100
//! 7, 0.6620, 0.5000, 0.5000, 0.7000, 0.6500
//! ```
//!
//! 依次为类别（ID 或名称）、置信度、归一化的 `x_min, y_min, x_max, y_max`。
//! 缺少某帧的文件表示该帧没有检测结果。

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{ClassRef, DetectItem, DetectResult, Model, ModelError},
};

pub struct RecordedModel {
  directory: PathBuf,
}

impl FromUrlWithScheme for RecordedModel {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordedModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    Self::open(crate::url_path(url))
  }
}

impl RecordedModel {
  pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, ModelError> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
      return Err(ModelError::ModelPathError(format!(
        "检测记录目录不存在: {}",
        directory.display()
      )));
    }
    info!("使用检测记录目录: {}", directory.display());
    Ok(Self {
      directory: directory.to_path_buf(),
    })
  }

  pub fn record_path(&self, index: u64) -> PathBuf {
    self.directory.join(format!("{:06}.txt", index))
  }
}

impl Model for RecordedModel {
  type Input = Frame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let path = self.record_path(input.index);
    if !path.exists() {
      return Ok(DetectResult::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let items = content
      .lines()
      .enumerate()
      .filter(|(_, line)| !line.trim().is_empty())
      .map(|(no, line)| {
        parse_record_line(line).map_err(|reason| ModelError::RecordFormat {
          file: path.display().to_string(),
          line: no + 1,
          reason,
        })
      })
      .collect::<Result<Vec<_>, _>>()?;

    debug!("帧 {} 回放 {} 条检测记录", input.index, items.len());
    Ok(DetectResult::from(items))
  }
}

fn parse_record_line(line: &str) -> Result<DetectItem, String> {
  let fields: Vec<&str> = line.split(',').map(str::trim).collect();
  if fields.len() != 6 {
    return Err(format!("期望 6 个字段, 实际 {} 个", fields.len()));
  }

  let label = match fields[0].parse::<u32>() {
    Ok(id) => ClassRef::Id(id),
    Err(_) => ClassRef::Name(fields[0].to_string()),
  };

  let mut numbers = [0f32; 5];
  for (slot, field) in numbers.iter_mut().zip(&fields[1..]) {
    *slot = field
      .parse::<f32>()
      .map_err(|e| format!("无法解析数值 '{}': {}", field, e))?;
  }

  Ok(DetectItem {
    label,
    score: numbers[0],
    bbox: [numbers[1], numbers[2], numbers[3], numbers[4]],
  })
}
