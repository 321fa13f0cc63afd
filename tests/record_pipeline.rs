// 该文件是 Chexun （车巡） 项目的一部分。
// tests/record_pipeline.rs - 基于 URL 的完整流水线测试
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

use std::{path::Path, time::Duration};

use image::RgbImage;
use url::Url;

use chexun::{
  FromUrl,
  analytics::{AnalyticsEngine, LabelPairs},
  config::PipelineConfig,
  detector::VehicleDetector,
  model::{ClassList, ModelWrapper},
  output::{Annotator, FrameEncoder},
  stream::StreamController,
};

fn write_frames(dir: &Path, count: usize) {
  for i in 0..count {
    RgbImage::from_pixel(160, 120, image::Rgb([40, 40, 40]))
      .save(dir.join(format!("frame_{:04}.png", i)))
      .unwrap();
  }
}

#[test]
fn recorded_detections_flow_into_summary_and_stream() {
  let work = tempfile::tempdir().unwrap();
  let frames = work.path().join("frames");
  let records = work.path().join("records");
  std::fs::create_dir_all(&frames).unwrap();
  std::fs::create_dir_all(&records).unwrap();

  write_frames(&frames, 4);
  // 2 = car, 1 = bicycle, 7 = truck
  std::fs::write(records.join("000000.txt"), "2, 0.91, 0.1, 0.1, 0.3, 0.3\n").unwrap();
  std::fs::write(
    records.join("000001.txt"),
    "1, 0.95, 0.1, 0.1, 0.3, 0.3\n7, 0.45, 0.5, 0.5, 0.9, 0.9\n",
  )
  .unwrap();
  std::fs::write(records.join("000003.txt"), "truck, 0.66, 0.2, 0.2, 0.6, 0.6\n").unwrap();

  let config = PipelineConfig::default()
    .with_output_dir(work.path().join("output"))
    .with_summary_path(work.path().join("detections.json"))
    .with_poll_interval(Duration::from_millis(10));

  let model_url = Url::parse(&format!("record://{}", records.display())).unwrap();
  let input_url = Url::parse(&format!("frames://{}", frames.display())).unwrap();

  let classes =
    ClassList::from_file(Path::new(env!("CARGO_MANIFEST_DIR")).join("labels/coco.txt")).unwrap();
  let detector = VehicleDetector::new(classes, config.detector_config())
    .with_model(ModelWrapper::from_url(&model_url).unwrap());

  let controller = StreamController::new(
    detector,
    input_url,
    FrameEncoder::new(Annotator::new().unwrap(), config.jpeg_quality),
    AnalyticsEngine::new(&config).unwrap(),
    config.poll_interval,
  );

  let mut body = Vec::new();
  for frame in controller.start_stream().unwrap() {
    frame.unwrap().write_multipart(&mut body).unwrap();
  }

  let parts = body
    .windows(b"--frame\r\n".len())
    .filter(|w| *w == b"--frame\r\n")
    .count();
  assert_eq!(parts, 4);
  assert_eq!(controller.processed_frames(), 4);
  assert!(controller.status().finished);

  let pairs = LabelPairs::load(work.path().join("detections.json")).unwrap();
  assert_eq!(pairs.y_pred, vec![0, 1]);
  assert_eq!(pairs.y_true, vec![0, 1]);
  assert!(work.path().join("output/detecciones_por_tipo.png").exists());
}

#[cfg(feature = "pdf_report")]
#[test]
fn report_is_generated_from_persisted_summary() {
  use chexun::report::PdfReport;

  let work = tempfile::tempdir().unwrap();
  let summary = work.path().join("detections.json");
  LabelPairs {
    y_true: vec![0, 0, 1, 2, 3],
    y_pred: vec![0, 0, 1, 2, 3],
  }
  .save(&summary)
  .unwrap();

  let pdf = work.path().join("reporte.pdf");
  let pairs = LabelPairs::load(&summary).unwrap();
  PdfReport::new(&pdf).unwrap().generate(&pairs).unwrap();

  assert!(std::fs::metadata(&pdf).unwrap().len() > 0);
}
