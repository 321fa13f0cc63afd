// 该文件是 Chexun （车巡） 项目的一部分。
// src/report.rs - PDF 报告
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

//! # PDF 报告
//!
//! 根据已保存的检测汇总生成报告：标题、生成时间、各类别数量与占比以及一张柱状图。
//! 柱状图先渲染到临时 PNG 文件再嵌入，临时文件在任何退出路径上都会被删除。
//!
//! 内置字体只支持 Windows-1252 字符集，报告文字使用西班牙语。

use std::{
  fs::File,
  io::BufWriter,
  path::{Path, PathBuf},
};

use printpdf::{
  BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
  PdfLayerReference, image_crate::codecs::png::PngDecoder,
};
use thiserror::Error;
use tracing::info;

use crate::{
  analytics::{AnalyticsError, BarChart, ChartBar, ChartRenderer, LabelPairs, RasterChartRenderer},
  detector::VehicleClass,
};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const CHART_WIDTH_MM: f32 = 170.0;
const CHART_ASPECT: f32 = 0.5;

/// 报告柱状图配色，按类别编码排列
const REPORT_COLORS: [[u8; 3]; 4] = [
  [0x4a, 0x90, 0xe2],
  [0x27, 0xae, 0x60],
  [0xe7, 0x4c, 0x3c],
  [0xf3, 0x9c, 0x12],
];

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("PDF 错误: {0}")]
  Pdf(#[from] printpdf::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图表嵌入错误: {0}")]
  Image(String),
  #[error("图表渲染错误: {0}")]
  Chart(#[from] AnalyticsError),
}

/// 每个类别的一行：`Autos: 2 (100.0%)`
pub fn summary_lines(pairs: &LabelPairs) -> Vec<String> {
  let counts = pairs.counts();
  let total = pairs.len();
  VehicleClass::ALL
    .into_iter()
    .map(|class| {
      let count = counts[class.code() as usize];
      let percentage = if total > 0 {
        count as f64 / total as f64 * 100.0
      } else {
        0.0
      };
      format!("{}: {} ({:.1}%)", class.display_name(), count, percentage)
    })
    .collect()
}

/// 自上而下排版，空间不足时换页
struct PageCursor<'a> {
  doc: &'a PdfDocumentReference,
  layer: PdfLayerReference,
  y: f32,
  pages: usize,
}

impl PageCursor<'_> {
  fn ensure_room(&mut self, height: f32) {
    if self.y - height >= MARGIN {
      return;
    }
    self.pages += 1;
    let (page, layer) = self.doc.add_page(
      Mm(PAGE_WIDTH),
      Mm(PAGE_HEIGHT),
      format!("Layer {}", self.pages),
    );
    self.layer = self.doc.get_page(page).get_layer(layer);
    self.y = PAGE_HEIGHT - MARGIN;
  }

  fn line(&mut self, text: &str, size: f32, height: f32, font: &IndirectFontRef) {
    self.ensure_room(height);
    self.y -= height;
    self.layer.use_text(text, size, Mm(MARGIN), Mm(self.y), font);
  }

  fn gap(&mut self, height: f32) {
    self.y -= height;
  }
}

pub struct PdfReport {
  path: PathBuf,
  renderer: RasterChartRenderer,
}

impl PdfReport {
  pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self, ReportError> {
    Ok(Self {
      path: path.into(),
      renderer: RasterChartRenderer::new()?,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn generate(&self, pairs: &LabelPairs) -> Result<(), ReportError> {
    let (doc, page, layer) = PdfDocument::new(
      "Reporte de Detección de Vehículos",
      Mm(PAGE_WIDTH),
      Mm(PAGE_HEIGHT),
      "Layer 1",
    );
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold)?;
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica)?;

    let mut cursor = PageCursor {
      doc: &doc,
      layer: doc.get_page(page).get_layer(layer),
      y: PAGE_HEIGHT - MARGIN,
      pages: 1,
    };

    cursor.line("Reporte de Detección de Vehículos", 24.0, 20.0, &bold);
    let generated = chrono::Local::now().format("%Y-%m-%d %H:%M");
    cursor.line(&format!("Generado: {}", generated), 12.0, 10.0, &regular);
    cursor.gap(10.0);

    cursor.line("Resumen de Detecciones:", 16.0, 10.0, &bold);
    cursor.line(
      &format!("Total de detecciones: {}", pairs.len()),
      12.0,
      10.0,
      &regular,
    );
    for line in summary_lines(pairs) {
      cursor.line(&line, 12.0, 10.0, &regular);
    }
    cursor.gap(10.0);

    cursor.line("Gráfico de Detecciones:", 16.0, 10.0, &bold);
    self.embed_chart(&mut cursor, pairs)?;

    let pages = cursor.pages;
    doc.save(&mut BufWriter::new(File::create(&self.path)?))?;
    info!("报告已生成: {} ({} 页)", self.path.display(), pages);
    Ok(())
  }

  fn embed_chart(&self, cursor: &mut PageCursor<'_>, pairs: &LabelPairs) -> Result<(), ReportError> {
    let counts = pairs.counts();
    let chart = BarChart {
      title: "Detecciones por Tipo de Vehículo".to_string(),
      y_label: "Cantidad".to_string(),
      y_max: None,
      bars: VehicleClass::ALL
        .into_iter()
        .map(|class| {
          let count = counts[class.code() as usize];
          ChartBar {
            label: class.display_name().to_string(),
            value: count as f64,
            annotation: count.to_string(),
            color: REPORT_COLORS[class.code() as usize],
          }
        })
        .collect(),
    };

    // 离开作用域时删除
    let chart_file = tempfile::Builder::new()
      .prefix("chexun-chart-")
      .suffix(".png")
      .tempfile()?;
    self.renderer.bar_chart(&chart, chart_file.path())?;

    let decoder = PngDecoder::new(File::open(chart_file.path())?)
      .map_err(|e| ReportError::Image(e.to_string()))?;
    let image = Image::try_from(decoder).map_err(|e| ReportError::Image(e.to_string()))?;

    let width_px = image.image.width.0 as f32;
    let dpi = width_px * 25.4 / CHART_WIDTH_MM;
    let height_mm = CHART_WIDTH_MM * CHART_ASPECT;

    cursor.ensure_room(height_mm + 5.0);
    cursor.y -= height_mm + 5.0;
    image.add_to_layer(
      cursor.layer.clone(),
      ImageTransform {
        translate_x: Some(Mm(MARGIN)),
        translate_y: Some(Mm(cursor.y)),
        dpi: Some(dpi),
        ..Default::default()
      },
    );
    Ok(())
  }
}
