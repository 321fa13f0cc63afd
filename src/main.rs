// 该文件是 Chexun （车巡） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{
  fs::File,
  io::{BufWriter, Write},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use chexun::{
  FromUrl,
  analytics::AnalyticsEngine,
  detector::VehicleDetector,
  model::{ClassList, ModelWrapper},
  output::{Annotator, FrameEncoder, MULTIPART_CONTENT_TYPE},
  stream::StreamController,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出: {} ({})", args.output, MULTIPART_CONTENT_TYPE);
  info!("置信度阈值: {}", args.confidence);

  let mut config = args.pipeline_config();
  let classes = ClassList::from_file(&args.classes)?;
  let model = ModelWrapper::from_url(&args.model)?;
  if let Some(size) = model.input_size() {
    if size != config.resize {
      warn!(
        "推理尺寸 {}x{} 与模型输入不一致，改用 {}x{}",
        config.resize.width, config.resize.height, size.width, size.height
      );
    }
    config = config.with_resize(size);
  }
  let detector = VehicleDetector::new(classes, config.detector_config()).with_model(model);
  let encoder = FrameEncoder::new(Annotator::new()?, config.jpeg_quality);
  let engine = AnalyticsEngine::new(&config)?;

  let controller = StreamController::new(
    detector,
    args.input.clone(),
    encoder,
    engine,
    config.poll_interval,
  );

  let interrupted = Arc::new(AtomicBool::new(false));
  {
    let interrupted = interrupted.clone();
    ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
  }

  let mut writer: Box<dyn Write> = if args.output == "-" {
    Box::new(std::io::stdout().lock())
  } else {
    Box::new(BufWriter::new(File::create(&args.output)?))
  };

  let mut stream = controller.start_stream()?;
  let mut emitted = 0u64;
  for frame in stream.by_ref() {
    frame?.write_multipart(&mut writer)?;
    emitted += 1;

    if interrupted.load(Ordering::SeqCst) {
      warn!("收到中断信号，停止推流");
      break;
    }
    if args.max_frames.is_some_and(|max| emitted >= max) {
      info!("已达到最大帧数限制: {}", emitted);
      break;
    }
  }
  // 提前结束时在这里保存检测汇总
  drop(stream);
  writer.flush()?;

  let status = controller.status();
  info!(
    "推流结束: 输出 {} 帧, 检测 {} 辆车, finished={}",
    emitted,
    controller.ledger().len(),
    status.finished
  );

  Ok(())
}
