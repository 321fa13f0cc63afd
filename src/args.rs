// 该文件是 Chexun （车巡） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use chexun::{config::PipelineConfig, frame::FrameSize};

/// Chexun 车辆检测推流
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  /// 支持格式:
  /// - 检测记录回放: record:///path/to/records
  /// - ONNX 模型: onnx:///path/to/yolov8s.onnx?size=640x640（需要 model_onnx 特性）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// 支持格式:
  /// - 图像序列目录: frames:///path/to/frames?fps=25
  /// - 视频文件: gst://file/path/to/video.mp4（需要 gstreamer_input 特性）
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 类别名称文件，每行一个，行号即类别 ID
  #[arg(long, default_value = "labels/coco.txt", value_name = "FILE")]
  pub classes: PathBuf,

  /// multipart 推流输出文件，`-` 表示标准输出
  #[arg(long, default_value = "-", value_name = "OUTPUT")]
  pub output: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 推理尺寸 宽x高；模型有固定输入尺寸时以模型为准
  #[arg(long, default_value = "640x640", value_name = "WxH")]
  pub resize: FrameSize,

  /// 统计图输出目录
  #[arg(long, default_value = "data/output", value_name = "DIR")]
  pub output_dir: PathBuf,

  /// JSON 汇总文件路径
  #[arg(long, default_value = "data/detections.json", value_name = "FILE")]
  pub summary: PathBuf,

  /// 最大推流帧数，达到后提前结束
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,
}

impl Args {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig::default()
      .with_threshold(self.confidence)
      .with_resize(self.resize)
      .with_output_dir(&self.output_dir)
      .with_summary_path(&self.summary)
  }
}
