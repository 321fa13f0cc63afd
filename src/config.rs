// 该文件是 Chexun （车巡） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::{path::PathBuf, time::Duration};

use crate::{
  detector::{DetectorConfig, VehicleClass},
  frame::FrameSize,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_TEMPORAL_SEGMENTS: usize = 9;
pub const DEFAULT_HISTOGRAM_BINS: usize = 20;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// 一次运行的全部配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub threshold: f32,
  pub targets: Vec<VehicleClass>,
  /// 推理、标注和推流共用的尺寸
  pub resize: FrameSize,
  pub temporal_segments: usize,
  pub histogram_bins: usize,
  /// 图表输出目录
  pub output_dir: PathBuf,
  /// JSON 汇总文件路径
  pub summary_path: PathBuf,
  /// 暂停时的轮询间隔
  pub poll_interval: Duration,
  pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      targets: VehicleClass::ALL.to_vec(),
      resize: FrameSize::default(),
      temporal_segments: DEFAULT_TEMPORAL_SEGMENTS,
      histogram_bins: DEFAULT_HISTOGRAM_BINS,
      output_dir: PathBuf::from("data/output"),
      summary_path: PathBuf::from("data/detections.json"),
      poll_interval: Duration::from_millis(100),
      jpeg_quality: DEFAULT_JPEG_QUALITY,
    }
  }
}

impl PipelineConfig {
  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_output_dir<P: Into<PathBuf>>(mut self, output_dir: P) -> Self {
    self.output_dir = output_dir.into();
    self
  }

  pub fn with_summary_path<P: Into<PathBuf>>(mut self, summary_path: P) -> Self {
    self.summary_path = summary_path.into();
    self
  }

  pub fn with_resize(mut self, resize: FrameSize) -> Self {
    self.resize = resize;
    self
  }

  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn detector_config(&self) -> DetectorConfig {
    DetectorConfig {
      threshold: self.threshold,
      targets: self.targets.clone(),
      input_size: self.resize,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let config = PipelineConfig::default();
    assert_eq!(config.threshold, 0.5);
    assert_eq!(config.targets.len(), 4);
    assert_eq!(config.resize, FrameSize::new(640, 640));
    assert_eq!(config.temporal_segments, 9);
    assert_eq!(config.histogram_bins, 20);
    assert_eq!(config.poll_interval, Duration::from_millis(100));
  }

  #[test]
  fn detector_config_follows_pipeline() {
    let config = PipelineConfig::default()
      .with_threshold(0.7)
      .with_resize(FrameSize::new(320, 256));
    let detector = config.detector_config();
    assert_eq!(detector.threshold, 0.7);
    assert_eq!(detector.input_size, FrameSize::new(320, 256));
  }
}
