// 该文件是 Chexun （车巡） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频输入
//!
//! 通过 `gst://file/<path>` 打开一个有限长度的视频文件，逐帧解码为 RGB。
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 管道在输入对象析构时切换到 `Null` 状态，任何退出路径都会释放解码资源。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::InputError,
};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换元素为 appsink")]
  AppSinkConversionFailed,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  frame_index: u64,
  finished: bool,
}

impl FromUrlWithScheme for GStreamerInput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("file") {
      return Err(InputError::SchemeMismatch(format!(
        "期望输入方式 '{}://file/...', 实际为 '{}'",
        Self::SCHEME,
        url
      )));
    }

    Ok(Self::open_file(&crate::url_path(url))?)
  }
}

impl GStreamerInput {
  pub fn open_file(path: &str) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    // 文件回放不能丢帧，也不需要按时钟同步
    let description = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
       appsink name=sink sync=false max-buffers=4 drop=false",
      path
    );
    info!("GStreamer 管道描述: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(Self {
      pipeline,
      appsink,
      frame_index: 0,
      finished: false,
    })
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(e) => {
        self.finished = true;
        if self.appsink.is_eos() {
          info!("视频读取完毕，共 {} 帧", self.frame_index);
          return None;
        }
        return Some(Err(InputError::SourceRead(e.to_string())));
      }
    };

    let index = self.frame_index;
    self.frame_index += 1;
    Some(convert_sample(sample, index).map_err(|e| InputError::SourceRead(e.to_string())))
  }
}

fn convert_sample(sample: gst::Sample, index: u64) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info = gst_video::VideoInfo::from_caps(caps)?;
  let width = video_info.width();
  let height = video_info.height();
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let row_bytes = width as usize * 3;
  if data.len() < stride * (height as usize).saturating_sub(1) + row_bytes {
    return Err(GStreamerInputError::PipelineError(format!(
      "缓冲区大小不匹配: {} 字节",
      data.len()
    )));
  }

  // 去掉行对齐填充
  let mut pixels = Vec::with_capacity(row_bytes * height as usize);
  for y in 0..height as usize {
    let row_start = y * stride;
    pixels.extend_from_slice(&data[row_start..row_start + row_bytes]);
  }

  let image = RgbImage::from_raw(width, height, pixels)
    .ok_or_else(|| GStreamerInputError::PipelineError("无法创建 RGB 图像".to_string()))?;

  let timestamp_ms = buffer.pts().map(|pts| pts.mseconds()).unwrap_or(0);

  Ok(Frame::new(image, index, timestamp_ms))
}
