// 该文件是 Chexun （车巡） 项目的一部分。
// src/analytics.rs - 检测统计分析
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

//! # 统计分析
//!
//! 会话结束后读取检测账本，写出 JSON 汇总和四张统计图。
//!
//! 汇总中的 `y_true` 与 `y_pred` 逐项相同：没有独立的真值来源，每个保留下来的
//! 检测都被当作正确结果。这些数据只描述检测到了什么，不是模型精度的度量。
//!
//! 每个产物独立生成，一个失败不影响其余产物。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  config::PipelineConfig,
  detector::{Detection, VehicleClass},
};

pub mod chart;
pub use self::chart::{
  BarChart, ChartBar, ChartRenderer, ChartSeries, Histogram, RasterChartRenderer, StackedBarChart,
};

const CLASS_COUNT: usize = VehicleClass::ALL.len();

/// 各类别配色，按类别编码排列
pub const CLASS_COLORS: [[u8; 3]; CLASS_COUNT] = [
  [0x42, 0x85, 0xf4],
  [0x34, 0xa8, 0x53],
  [0xfb, 0xbc, 0x05],
  [0xea, 0x43, 0x35],
];

#[derive(Error, Debug)]
pub enum AnalyticsError {
  #[error("没有检测记录")]
  NoDetections,
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("图表渲染错误: {0}")]
  Render(String),
}

/// JSON 汇总：按类别编码表示的标签对
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPairs {
  pub y_true: Vec<u8>,
  pub y_pred: Vec<u8>,
}

impl LabelPairs {
  pub fn from_ledger(ledger: &[Detection]) -> Result<Self, AnalyticsError> {
    if ledger.is_empty() {
      return Err(AnalyticsError::NoDetections);
    }
    let y_pred: Vec<u8> = ledger.iter().map(|d| d.class.code()).collect();
    Ok(Self {
      y_true: y_pred.clone(),
      y_pred,
    })
  }

  pub fn len(&self) -> usize {
    self.y_pred.len()
  }

  pub fn is_empty(&self) -> bool {
    self.y_pred.is_empty()
  }

  /// 按预测标签统计各类别数量，未知编码忽略
  pub fn counts(&self) -> [usize; CLASS_COUNT] {
    let mut counts = [0; CLASS_COUNT];
    for code in &self.y_pred {
      if let Some(class) = VehicleClass::from_code(*code) {
        counts[class.code() as usize] += 1;
      }
    }
    counts
  }

  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AnalyticsError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&content)?)
  }

  pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AnalyticsError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string(self)?)?;
    Ok(())
  }
}

pub fn class_counts(ledger: &[Detection]) -> [usize; CLASS_COUNT] {
  let mut counts = [0; CLASS_COUNT];
  for detection in ledger {
    counts[detection.class.code() as usize] += 1;
  }
  counts
}

/// 各类别平均置信度，没有检测的类别记为 0
pub fn mean_confidence(ledger: &[Detection]) -> [f32; CLASS_COUNT] {
  let mut sums = [0f32; CLASS_COUNT];
  let counts = class_counts(ledger);
  for detection in ledger {
    sums[detection.class.code() as usize] += detection.confidence;
  }

  let mut means = [0f32; CLASS_COUNT];
  for ((mean, sum), count) in means.iter_mut().zip(sums).zip(counts) {
    if count > 0 {
      *mean = sum / count as f32;
    }
  }
  means
}

/// 把账本按下标等分为 `segments` 段，统计每段各类别数量
///
/// 分段边界为 `floor(i * n / segments)`，`i = 0..=segments`。
pub fn temporal_distribution(ledger: &[Detection], segments: usize) -> Vec<[usize; CLASS_COUNT]> {
  let n = ledger.len();
  (0..segments)
    .map(|i| {
      let start = i * n / segments;
      let end = (i + 1) * n / segments;
      class_counts(&ledger[start..end])
    })
    .collect()
}

/// 置信度直方图的取值范围：数据的最小值到最大值
///
/// 所有值相同时取 `(v - 0.5, v + 0.5)`，账本为空时取 `(0, 1)`。
pub fn confidence_range(ledger: &[Detection]) -> (f32, f32) {
  let mut values = ledger.iter().map(|d| d.confidence);
  let Some(first) = values.next() else {
    return (0.0, 1.0);
  };
  let (lo, hi) = values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
  if lo == hi { (lo - 0.5, hi + 0.5) } else { (lo, hi) }
}

/// `range` 上的等宽直方图，上界计入最后一个区间，范围外的值忽略
pub fn confidence_histogram(ledger: &[Detection], range: (f32, f32), bins: usize) -> Vec<u32> {
  let mut histogram = vec![0u32; bins];
  let (lo, hi) = range;
  if bins == 0 || hi <= lo {
    return histogram;
  }
  for detection in ledger {
    let value = detection.confidence;
    if !(lo..=hi).contains(&value) {
      continue;
    }
    let bin = (((value - lo) / (hi - lo) * bins as f32) as usize).min(bins - 1);
    histogram[bin] += 1;
  }
  histogram
}

/// 固定的四类统计图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
  CountsByClass,
  MeanConfidence,
  TemporalDistribution,
  ConfidenceHistogram,
}

impl ChartKind {
  pub const ALL: [ChartKind; 4] = [
    ChartKind::CountsByClass,
    ChartKind::MeanConfidence,
    ChartKind::TemporalDistribution,
    ChartKind::ConfidenceHistogram,
  ];

  pub fn file_name(self) -> &'static str {
    match self {
      ChartKind::CountsByClass => "detecciones_por_tipo.png",
      ChartKind::MeanConfidence => "confianza_promedio.png",
      ChartKind::TemporalDistribution => "distribucion_temporal.png",
      ChartKind::ConfidenceHistogram => "distribucion_confianza.png",
    }
  }
}

/// 一次分析的全部产物，每项独立成败
#[derive(Debug)]
pub struct AnalyticsOutcome {
  pub summary: Result<PathBuf, AnalyticsError>,
  pub charts: Vec<(ChartKind, Result<PathBuf, AnalyticsError>)>,
}

impl AnalyticsOutcome {
  pub fn is_complete(&self) -> bool {
    self.summary.is_ok() && self.charts.iter().all(|(_, result)| result.is_ok())
  }

  pub fn written(&self) -> Vec<&Path> {
    std::iter::once(&self.summary)
      .chain(self.charts.iter().map(|(_, result)| result))
      .filter_map(|result| result.as_ref().ok().map(PathBuf::as_path))
      .collect()
  }

  pub fn chart(&self, kind: ChartKind) -> Option<&Result<PathBuf, AnalyticsError>> {
    self
      .charts
      .iter()
      .find(|(k, _)| *k == kind)
      .map(|(_, result)| result)
  }
}

pub struct AnalyticsEngine {
  output_dir: PathBuf,
  summary_path: PathBuf,
  temporal_segments: usize,
  histogram_bins: usize,
  renderer: Box<dyn ChartRenderer + Send + Sync>,
}

impl AnalyticsEngine {
  pub fn new(config: &PipelineConfig) -> Result<Self, AnalyticsError> {
    Ok(Self::with_renderer(config, RasterChartRenderer::new()?))
  }

  pub fn with_renderer<R: ChartRenderer + Send + Sync + 'static>(
    config: &PipelineConfig,
    renderer: R,
  ) -> Self {
    Self {
      output_dir: config.output_dir.clone(),
      summary_path: config.summary_path.clone(),
      temporal_segments: config.temporal_segments,
      histogram_bins: config.histogram_bins,
      renderer: Box::new(renderer),
    }
  }

  pub fn summary_path(&self) -> &Path {
    &self.summary_path
  }

  pub fn chart_path(&self, kind: ChartKind) -> PathBuf {
    self.output_dir.join(kind.file_name())
  }

  /// 只写 JSON 汇总，账本为空时不写文件
  pub fn persist_summary(&self, ledger: &[Detection]) -> Result<PathBuf, AnalyticsError> {
    let pairs = LabelPairs::from_ledger(ledger)?;
    pairs.save(&self.summary_path)?;
    info!(
      "检测汇总已保存: {} ({} 条)",
      self.summary_path.display(),
      pairs.len()
    );
    Ok(self.summary_path.clone())
  }

  pub fn run(&self, ledger: &[Detection]) -> AnalyticsOutcome {
    let summary = self.persist_summary(ledger);
    if let Err(e) = &summary {
      warn!("检测汇总未写出: {}", e);
    }

    let charts = ChartKind::ALL
      .into_iter()
      .map(|kind| {
        let result = self.render_chart(kind, ledger);
        match &result {
          Ok(path) => info!("统计图已生成: {}", path.display()),
          Err(AnalyticsError::NoDetections) => warn!("没有检测记录，跳过 {}", kind.file_name()),
          Err(e) => error!("统计图 {} 生成失败: {}", kind.file_name(), e),
        }
        (kind, result)
      })
      .collect();

    AnalyticsOutcome { summary, charts }
  }

  fn render_chart(&self, kind: ChartKind, ledger: &[Detection]) -> Result<PathBuf, AnalyticsError> {
    if ledger.is_empty() {
      return Err(AnalyticsError::NoDetections);
    }
    std::fs::create_dir_all(&self.output_dir)?;
    let path = self.chart_path(kind);

    match kind {
      ChartKind::CountsByClass => {
        let counts = class_counts(ledger);
        let chart = BarChart {
          title: "Detecciones por Tipo de Vehículo".to_string(),
          y_label: "Cantidad de Detecciones".to_string(),
          y_max: None,
          bars: class_bars(|i| (counts[i] as f64, counts[i].to_string())),
        };
        self.renderer.bar_chart(&chart, &path)?;
      }
      ChartKind::MeanConfidence => {
        let means = mean_confidence(ledger);
        let chart = BarChart {
          title: "Confianza Promedio por Tipo de Vehículo".to_string(),
          y_label: "Confianza Promedio".to_string(),
          y_max: Some(1.0),
          bars: class_bars(|i| (means[i] as f64, format!("{:.2}%", means[i] * 100.0))),
        };
        self.renderer.bar_chart(&chart, &path)?;
      }
      ChartKind::TemporalDistribution => {
        let timeline = temporal_distribution(ledger, self.temporal_segments);
        let chart = StackedBarChart {
          title: "Distribución Temporal de Detecciones".to_string(),
          x_label: "Segmentos de Video".to_string(),
          y_label: "Número de Detecciones".to_string(),
          categories: (0..timeline.len()).map(|i| i.to_string()).collect(),
          series: VehicleClass::ALL
            .into_iter()
            .map(|class| ChartSeries {
              label: class.display_name().to_string(),
              color: CLASS_COLORS[class.code() as usize],
              values: timeline
                .iter()
                .map(|segment| segment[class.code() as usize] as f64)
                .collect(),
            })
            .collect(),
        };
        self.renderer.stacked_bar_chart(&chart, &path)?;
      }
      ChartKind::ConfidenceHistogram => {
        let range = confidence_range(ledger);
        let chart = Histogram {
          title: "Distribución de Niveles de Confianza".to_string(),
          x_label: "Nivel de Confianza".to_string(),
          y_label: "Frecuencia".to_string(),
          range,
          counts: confidence_histogram(ledger, range, self.histogram_bins),
          color: CLASS_COLORS[0],
        };
        self.renderer.histogram(&chart, &path)?;
      }
    }

    Ok(path)
  }
}

fn class_bars(value: impl Fn(usize) -> (f64, String)) -> Vec<ChartBar> {
  VehicleClass::ALL
    .into_iter()
    .map(|class| {
      let (value, annotation) = value(class.code() as usize);
      ChartBar {
        label: class.display_name().to_string(),
        value,
        annotation,
        color: CLASS_COLORS[class.code() as usize],
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::BoundingBox;

  fn det(class: VehicleClass, confidence: f32) -> Detection {
    Detection {
      class,
      confidence,
      bbox: BoundingBox::new(0, 0, 10, 10),
    }
  }

  #[test]
  fn label_pairs_are_identical_sequences() {
    let ledger = [
      det(VehicleClass::Car, 0.9),
      det(VehicleClass::Motorcycle, 0.6),
      det(VehicleClass::Truck, 0.7),
    ];
    let pairs = LabelPairs::from_ledger(&ledger).unwrap();
    assert_eq!(pairs.y_pred, vec![0, 3, 1]);
    assert_eq!(pairs.y_true, pairs.y_pred);
    assert_eq!(pairs.counts(), [1, 1, 0, 1]);
  }

  #[test]
  fn empty_ledger_has_no_label_pairs() {
    assert!(matches!(
      LabelPairs::from_ledger(&[]),
      Err(AnalyticsError::NoDetections)
    ));
  }

  #[test]
  fn mean_confidence_defaults_to_zero() {
    let ledger = [det(VehicleClass::Car, 0.6), det(VehicleClass::Car, 0.8)];
    let means = mean_confidence(&ledger);
    assert!((means[0] - 0.7).abs() < 1e-6);
    assert_eq!(&means[1..], &[0.0, 0.0, 0.0]);
  }

  #[test]
  fn temporal_segments_cover_ledger() {
    let ledger: Vec<_> = (0..20)
      .map(|i| {
        let class = if i < 10 { VehicleClass::Car } else { VehicleClass::Bus };
        det(class, 0.9)
      })
      .collect();
    let timeline = temporal_distribution(&ledger, 9);

    assert_eq!(timeline.len(), 9);
    let total: usize = timeline.iter().flatten().sum();
    assert_eq!(total, 20);
    // 边界 0,2,4,6,8,11,13,15,17,20
    assert_eq!(timeline[0], [2, 0, 0, 0]);
    assert_eq!(timeline[4], [2, 0, 1, 0]);
    assert_eq!(timeline[8], [0, 0, 3, 0]);
  }

  #[test]
  fn short_ledger_leaves_empty_segments() {
    let ledger = [det(VehicleClass::Car, 0.9), det(VehicleClass::Truck, 0.9)];
    let timeline = temporal_distribution(&ledger, 9);
    assert_eq!(timeline.iter().flatten().sum::<usize>(), 2);
    assert_eq!(timeline[0], [0, 0, 0, 0]);
    assert_eq!(timeline[4], [1, 0, 0, 0]);
    assert_eq!(timeline[8], [0, 1, 0, 0]);
  }

  #[test]
  fn histogram_spans_observed_confidences() {
    let ledger = [
      det(VehicleClass::Car, 0.6),
      det(VehicleClass::Car, 0.65),
      det(VehicleClass::Bus, 1.0),
    ];
    let range = confidence_range(&ledger);
    assert_eq!(range, (0.6, 1.0));

    let histogram = confidence_histogram(&ledger, range, 20);
    assert_eq!(histogram.len(), 20);
    assert_eq!(histogram[0], 1);
    assert_eq!(histogram[2], 1);
    assert_eq!(histogram[19], 1);
    assert_eq!(histogram.iter().sum::<u32>(), 3);
  }

  #[test]
  fn histogram_of_equal_confidences_is_centered() {
    let ledger = [det(VehicleClass::Truck, 0.75), det(VehicleClass::Car, 0.75)];
    let range = confidence_range(&ledger);
    assert_eq!(range, (0.25, 1.25));

    let histogram = confidence_histogram(&ledger, range, 20);
    assert_eq!(histogram[10], 2);
    assert_eq!(histogram.iter().sum::<u32>(), 2);
  }

  #[test]
  fn empty_ledger_histogram_range_is_unit() {
    assert_eq!(confidence_range(&[]), (0.0, 1.0));
  }

  /// 只在指定文件名上失败的渲染器
  struct FailOn {
    file_name: &'static str,
    inner: RasterChartRenderer,
  }

  impl FailOn {
    fn check(&self, path: &Path) -> Result<(), AnalyticsError> {
      if path.file_name().is_some_and(|name| name == self.file_name) {
        return Err(AnalyticsError::Render(format!("无法渲染 {}", self.file_name)));
      }
      Ok(())
    }
  }

  impl ChartRenderer for FailOn {
    fn bar_chart(&self, chart: &BarChart, path: &Path) -> Result<(), AnalyticsError> {
      self.check(path)?;
      self.inner.bar_chart(chart, path)
    }

    fn stacked_bar_chart(&self, chart: &StackedBarChart, path: &Path) -> Result<(), AnalyticsError> {
      self.check(path)?;
      self.inner.stacked_bar_chart(chart, path)
    }

    fn histogram(&self, chart: &Histogram, path: &Path) -> Result<(), AnalyticsError> {
      self.check(path)?;
      self.inner.histogram(chart, path)
    }
  }

  #[test]
  fn failed_chart_leaves_other_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::default()
      .with_output_dir(dir.path().join("output"))
      .with_summary_path(dir.path().join("detections.json"));
    let engine = AnalyticsEngine::with_renderer(
      &config,
      FailOn {
        file_name: ChartKind::CountsByClass.file_name(),
        inner: RasterChartRenderer::new().unwrap(),
      },
    );
    let ledger = [
      det(VehicleClass::Car, 0.9),
      det(VehicleClass::Bus, 0.7),
      det(VehicleClass::Car, 0.8),
    ];

    let outcome = engine.run(&ledger);

    assert!(!outcome.is_complete());
    assert!(matches!(
      outcome.chart(ChartKind::CountsByClass),
      Some(Err(AnalyticsError::Render(_)))
    ));
    for kind in &ChartKind::ALL[1..] {
      assert!(matches!(outcome.chart(*kind), Some(Ok(_))));
      assert!(engine.chart_path(*kind).exists());
    }
    assert!(!engine.chart_path(ChartKind::CountsByClass).exists());

    assert_eq!(outcome.summary.as_deref().ok(), Some(engine.summary_path()));
    let pairs = LabelPairs::load(engine.summary_path()).unwrap();
    assert_eq!(pairs.y_pred, vec![0, 2, 0]);
  }

  #[test]
  fn chart_file_names_are_fixed() {
    let names: Vec<_> = ChartKind::ALL.iter().map(|k| k.file_name()).collect();
    assert_eq!(
      names,
      vec![
        "detecciones_por_tipo.png",
        "confianza_promedio.png",
        "distribucion_temporal.png",
        "distribucion_confianza.png"
      ]
    );
  }
}
