// 该文件是 Chexun （车巡） 项目的一部分。
// src/bin/chexun-report.rs - 根据检测汇总生成 PDF 报告
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use chexun::{analytics::LabelPairs, report::PdfReport};

/// Chexun 检测报告
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推流结束时保存的 JSON 汇总
  #[arg(long, default_value = "data/detections.json", value_name = "FILE")]
  pub summary: PathBuf,
  /// PDF 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测汇总: {}", args.summary.display());
  info!("报告路径: {}", args.output.display());

  let pairs = LabelPairs::load(&args.summary)?;
  info!("共 {} 条检测", pairs.len());

  PdfReport::new(&args.output)?.generate(&pairs)?;

  Ok(())
}
