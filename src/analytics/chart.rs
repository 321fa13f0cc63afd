// 该文件是 Chexun （车巡） 项目的一部分。
// src/analytics/chart.rs - 统计图渲染
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::analytics::AnalyticsError;

#[derive(Debug, Clone)]
pub struct ChartBar {
  pub label: String,
  pub value: f64,
  /// 绘制在柱顶的文字
  pub annotation: String,
  pub color: [u8; 3],
}

#[derive(Debug, Clone)]
pub struct BarChart {
  pub title: String,
  pub y_label: String,
  /// 固定纵轴上限，`None` 时按数据自动取值
  pub y_max: Option<f64>,
  pub bars: Vec<ChartBar>,
}

#[derive(Debug, Clone)]
pub struct ChartSeries {
  pub label: String,
  pub color: [u8; 3],
  pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct StackedBarChart {
  pub title: String,
  pub x_label: String,
  pub y_label: String,
  pub categories: Vec<String>,
  /// 自下而上堆叠
  pub series: Vec<ChartSeries>,
}

#[derive(Debug, Clone)]
pub struct Histogram {
  pub title: String,
  pub x_label: String,
  pub y_label: String,
  pub range: (f32, f32),
  pub counts: Vec<u32>,
  pub color: [u8; 3],
}

/// 把图表数据渲染为图片文件
pub trait ChartRenderer {
  fn bar_chart(&self, chart: &BarChart, path: &Path) -> Result<(), AnalyticsError>;
  fn stacked_bar_chart(&self, chart: &StackedBarChart, path: &Path) -> Result<(), AnalyticsError>;
  fn histogram(&self, chart: &Histogram, path: &Path) -> Result<(), AnalyticsError>;
}

const CHART_HEIGHT: u32 = 600;
const CHART_WIDTH: u32 = 1200;
const WIDE_CHART_WIDTH: u32 = 1500;
const MARGIN_LEFT: i32 = 90;
const MARGIN_RIGHT: i32 = 40;
const MARGIN_TOP: i32 = 70;
const MARGIN_BOTTOM: i32 = 80;
const Y_TICKS: usize = 5;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS_COLOR: Rgb<u8> = Rgb([60, 60, 60]);
const GRID_COLOR: Rgb<u8> = Rgb([225, 225, 225]);
const TEXT_COLOR: Rgb<u8> = Rgb([30, 30, 30]);

/// 基于 imageproc 的 PNG 渲染器
pub struct RasterChartRenderer {
  font: FontArc,
}

impl RasterChartRenderer {
  pub fn new() -> Result<Self, AnalyticsError> {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data)
      .map_err(|e| AnalyticsError::Render(format!("无法加载字体: {}", e)))?;
    Ok(Self { font })
  }

  fn canvas<'a>(&'a self, width: u32, title: &str, y_max: f64) -> Canvas<'a> {
    let mut image = RgbImage::from_pixel(width, CHART_HEIGHT, BACKGROUND);
    let title_scale = PxScale::from(26.0);
    let (title_w, _) = text_size(title_scale, &self.font, title);
    draw_text_mut(
      &mut image,
      TEXT_COLOR,
      (width as i32 - title_w as i32).max(0) / 2,
      20,
      title_scale,
      &self.font,
      title,
    );

    let mut canvas = Canvas {
      image,
      font: &self.font,
      left: MARGIN_LEFT,
      right: width as i32 - MARGIN_RIGHT,
      top: MARGIN_TOP,
      bottom: CHART_HEIGHT as i32 - MARGIN_BOTTOM,
      y_max: if y_max > 0.0 { y_max } else { 1.0 },
    };
    canvas.draw_grid();
    canvas
  }
}

/// 自动纵轴上限：留出 10% 给柱顶文字
fn auto_y_max(max_value: f64) -> f64 {
  if max_value <= 0.0 {
    1.0
  } else {
    max_value * 1.1
  }
}

struct Canvas<'a> {
  image: RgbImage,
  font: &'a FontArc,
  left: i32,
  right: i32,
  top: i32,
  bottom: i32,
  y_max: f64,
}

impl Canvas<'_> {
  fn plot_width(&self) -> i32 {
    self.right - self.left
  }

  fn y_to_px(&self, value: f64) -> i32 {
    let ratio = (value / self.y_max).clamp(0.0, 1.0);
    self.bottom - (ratio * (self.bottom - self.top) as f64).round() as i32
  }

  fn text(&mut self, x: i32, y: i32, size: f32, text: &str) {
    draw_text_mut(
      &mut self.image,
      TEXT_COLOR,
      x,
      y,
      PxScale::from(size),
      self.font,
      text,
    );
  }

  fn text_centered(&mut self, center_x: i32, y: i32, size: f32, text: &str) {
    let (w, _) = text_size(PxScale::from(size), self.font, text);
    self.text(center_x - w as i32 / 2, y, size, text);
  }

  fn draw_grid(&mut self) {
    for tick in 0..=Y_TICKS {
      let value = self.y_max * tick as f64 / Y_TICKS as f64;
      let y = self.y_to_px(value);
      draw_line_segment_mut(
        &mut self.image,
        (self.left as f32, y as f32),
        (self.right as f32, y as f32),
        GRID_COLOR,
      );
      let label = if self.y_max <= 1.0 {
        format!("{:.1}", value)
      } else {
        format!("{:.0}", value)
      };
      let (w, h) = text_size(PxScale::from(14.0), self.font, &label);
      self.text(self.left - w as i32 - 8, y - h as i32 / 2, 14.0, &label);
    }

    let (left, right, top, bottom) = (
      self.left as f32,
      self.right as f32,
      self.top as f32,
      self.bottom as f32,
    );
    draw_line_segment_mut(&mut self.image, (left, top), (left, bottom), AXIS_COLOR);
    draw_line_segment_mut(&mut self.image, (left, bottom), (right, bottom), AXIS_COLOR);
  }

  fn axis_labels(&mut self, x_label: &str, y_label: &str) {
    let center = self.left + self.plot_width() / 2;
    let y = self.bottom + 45;
    if !x_label.is_empty() {
      self.text_centered(center, y, 16.0, x_label);
    }
    // 纵轴标题横排在左上角
    self.text(10, self.top - 30, 16.0, y_label);
  }

  /// 从 `base` 向上绘制高度为 `value` 的柱，返回柱顶像素
  fn bar(&mut self, x: i32, width: u32, base: f64, value: f64, color: [u8; 3]) -> i32 {
    let y_base = self.y_to_px(base);
    let y_top = self.y_to_px(base + value);
    let height = y_base - y_top;
    if height > 0 && width > 0 {
      let rect = Rect::at(x, y_top).of_size(width, height as u32);
      draw_filled_rect_mut(&mut self.image, rect, Rgb(color));
    }
    y_top
  }

  fn legend(&mut self, series: &[ChartSeries]) {
    let x = self.right - 170;
    for (i, s) in series.iter().enumerate() {
      let y = self.top + 10 + i as i32 * 24;
      draw_filled_rect_mut(&mut self.image, Rect::at(x, y).of_size(16, 16), Rgb(s.color));
      self.text(x + 24, y, 15.0, &s.label);
    }
  }

  fn save(self, path: &Path) -> Result<(), AnalyticsError> {
    self.image.save(path)?;
    Ok(())
  }
}

impl ChartRenderer for RasterChartRenderer {
  fn bar_chart(&self, chart: &BarChart, path: &Path) -> Result<(), AnalyticsError> {
    let max_value = chart.bars.iter().map(|b| b.value).fold(0.0, f64::max);
    let y_max = chart.y_max.unwrap_or_else(|| auto_y_max(max_value));
    let mut canvas = self.canvas(CHART_WIDTH, &chart.title, y_max);

    let slots = chart.bars.len().max(1) as i32;
    let slot_width = canvas.plot_width() / slots;
    let bar_width = (slot_width as f32 * 0.6) as u32;

    for (i, bar) in chart.bars.iter().enumerate() {
      let center = canvas.left + slot_width * i as i32 + slot_width / 2;
      let top = canvas.bar(center - bar_width as i32 / 2, bar_width, 0.0, bar.value, bar.color);
      canvas.text_centered(center, top - 22, 16.0, &bar.annotation);
      let label_y = canvas.bottom + 10;
      canvas.text_centered(center, label_y, 16.0, &bar.label);
    }

    canvas.axis_labels("", &chart.y_label);
    canvas.save(path)
  }

  fn stacked_bar_chart(&self, chart: &StackedBarChart, path: &Path) -> Result<(), AnalyticsError> {
    let totals: Vec<f64> = (0..chart.categories.len())
      .map(|i| {
        chart
          .series
          .iter()
          .map(|s| s.values.get(i).copied().unwrap_or(0.0))
          .sum()
      })
      .collect();
    let max_total = totals.iter().copied().fold(0.0, f64::max);
    let mut canvas = self.canvas(WIDE_CHART_WIDTH, &chart.title, auto_y_max(max_total));

    let slots = chart.categories.len().max(1) as i32;
    let slot_width = canvas.plot_width() / slots;
    let bar_width = (slot_width as f32 * 0.8) as u32;

    for (i, category) in chart.categories.iter().enumerate() {
      let center = canvas.left + slot_width * i as i32 + slot_width / 2;
      let mut base = 0.0;
      for series in &chart.series {
        let value = series.values.get(i).copied().unwrap_or(0.0);
        canvas.bar(center - bar_width as i32 / 2, bar_width, base, value, series.color);
        base += value;
      }
      let label_y = canvas.bottom + 10;
      canvas.text_centered(center, label_y, 15.0, category);
    }

    canvas.legend(&chart.series);
    canvas.axis_labels(&chart.x_label, &chart.y_label);
    canvas.save(path)
  }

  fn histogram(&self, chart: &Histogram, path: &Path) -> Result<(), AnalyticsError> {
    let max_count = chart.counts.iter().copied().max().unwrap_or(0) as f64;
    let mut canvas = self.canvas(CHART_WIDTH, &chart.title, auto_y_max(max_count));

    let bins = chart.counts.len().max(1) as i32;
    let bin_width = canvas.plot_width() / bins;
    // 与坐标轴对齐的柱，留 1 像素间隔
    for (i, count) in chart.counts.iter().enumerate() {
      let x = canvas.left + bin_width * i as i32 + 1;
      canvas.bar(x, (bin_width - 1).max(1) as u32, 0.0, *count as f64, chart.color);
    }

    let (lo, hi) = chart.range;
    for tick in 0..=4 {
      let value = lo + (hi - lo) * tick as f32 / 4.0;
      let x = canvas.left + bin_width * bins * tick / 4;
      let label_y = canvas.bottom + 10;
      canvas.text_centered(x, label_y, 14.0, &format!("{:.2}", value));
    }

    canvas.axis_labels(&chart.x_label, &chart.y_label);
    canvas.save(path)
  }
}
