// 该文件是 Chexun （车巡） 项目的一部分。
// src/stream.rs - 推流控制
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

//! # 推流控制
//!
//! [`StreamController`] 持有当前会话。会话包含播放标志、结束标志、检测账本和
//! 已处理帧计数；重播时整体替换为新会话，旧会话只会被标记为已替换，不会被原地重置。
//!
//! [`FrameStream`] 是一次会话的有限帧序列：
//!
//! - 暂停时按轮询间隔等待，不读帧也不产出；
//! - 输入耗尽时标记结束并执行一次完整统计分析；
//! - 提前丢弃（断开连接）时释放输入并只保存 JSON 汇总；
//! - 会话被重播替换后，在下一次轮询时结束且不保存任何内容。

use std::{
  sync::{
    Arc, Mutex, PoisonError, RwLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  analytics::{AnalyticsEngine, AnalyticsOutcome},
  detector::{Detection, DetectorError, VehicleDetector},
  frame::Frame,
  input::{FrameSource, InputError, OpenInput},
  model::{DetectResult, Model},
  output::{DrawError, EncodedFrame, FrameEncoder, Render},
};

#[derive(Error, Debug)]
pub enum StreamError {
  #[error("当前会话的推流已经开始")]
  AlreadyStarted,
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("检测错误: {0}")]
  Detector(#[from] DetectorError),
  #[error("编码错误: {0}")]
  Encode(#[from] DrawError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
  Active,
  Paused,
  Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
  pub finished: bool,
  pub playing: bool,
}

/// 检测账本：只追加，顺序即检测到的时间顺序
#[derive(Debug, Clone, Default)]
pub struct Ledger {
  entries: Vec<Detection>,
}

impl Ledger {
  pub fn append<I: IntoIterator<Item = Detection>>(&mut self, detections: I) {
    self.entries.extend(detections);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn as_slice(&self) -> &[Detection] {
    &self.entries
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.entries.iter()
  }
}

struct Session {
  id: u64,
  ledger: Mutex<Ledger>,
  active: AtomicBool,
  finished: AtomicBool,
  started: AtomicBool,
  superseded: AtomicBool,
  analyzed: AtomicBool,
  processed_frames: AtomicU64,
}

impl Session {
  fn new(id: u64) -> Self {
    Self {
      id,
      ledger: Mutex::new(Ledger::default()),
      active: AtomicBool::new(true),
      finished: AtomicBool::new(false),
      started: AtomicBool::new(false),
      superseded: AtomicBool::new(false),
      analyzed: AtomicBool::new(false),
      processed_frames: AtomicU64::new(0),
    }
  }

  fn state(&self) -> StreamState {
    if self.finished.load(Ordering::SeqCst) {
      StreamState::Finished
    } else if self.active.load(Ordering::SeqCst) {
      StreamState::Active
    } else {
      StreamState::Paused
    }
  }

  fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
    self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

pub struct StreamController<M, S: OpenInput> {
  detector: Arc<VehicleDetector<M>>,
  source: S,
  encoder: Arc<FrameEncoder>,
  engine: Arc<AnalyticsEngine>,
  poll_interval: Duration,
  session: RwLock<Arc<Session>>,
  next_session: AtomicU64,
  /// 写汇总和统计图时持有；重播在替换会话前也要取得
  artifacts: Arc<Mutex<()>>,
}

impl<M, S: OpenInput> StreamController<M, S> {
  pub fn new(
    detector: VehicleDetector<M>,
    source: S,
    encoder: FrameEncoder,
    engine: AnalyticsEngine,
    poll_interval: Duration,
  ) -> Self {
    info!("创建会话 0");
    Self {
      detector: Arc::new(detector),
      source,
      encoder: Arc::new(encoder),
      engine: Arc::new(engine),
      poll_interval,
      session: RwLock::new(Arc::new(Session::new(0))),
      next_session: AtomicU64::new(1),
      artifacts: Arc::new(Mutex::new(())),
    }
  }

  fn current(&self) -> Arc<Session> {
    self
      .session
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// 打开输入并返回当前会话的帧序列，每个会话只能开始一次
  pub fn start_stream(&self) -> Result<FrameStream<M, S::Source>, StreamError> {
    let session = self.current();
    if session.started.swap(true, Ordering::SeqCst) {
      return Err(StreamError::AlreadyStarted);
    }

    let source = match self.source.open() {
      Ok(source) => source,
      Err(e) => {
        session.started.store(false, Ordering::SeqCst);
        return Err(e.into());
      }
    };
    info!("会话 {} 开始推流", session.id);

    Ok(FrameStream {
      session,
      source: Some(source),
      detector: self.detector.clone(),
      encoder: self.encoder.clone(),
      engine: self.engine.clone(),
      artifacts: self.artifacts.clone(),
      poll_interval: self.poll_interval,
      outcome: None,
    })
  }

  /// 设置播放标志；结束的会话保持结束
  pub fn set_active(&self, active: bool) -> StreamState {
    let session = self.current();
    if !session.finished.load(Ordering::SeqCst) {
      let previous = session.active.swap(active, Ordering::SeqCst);
      if previous != active {
        info!("会话 {} {}", session.id, if active { "继续播放" } else { "暂停" });
      }
    }
    session.state()
  }

  pub fn play(&self) -> StreamState {
    self.set_active(true)
  }

  pub fn pause(&self) -> StreamState {
    self.set_active(false)
  }

  /// 以新会话整体替换当前会话
  ///
  /// 旧会话正在写统计产物时等待其完成，返回后旧会话不会再写任何文件。
  pub fn replay(&self) {
    let _artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
    let id = self.next_session.fetch_add(1, Ordering::SeqCst);
    let fresh = Arc::new(Session::new(id));
    let old = {
      let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
      std::mem::replace(&mut *guard, fresh)
    };
    old.superseded.store(true, Ordering::SeqCst);
    info!("重播: 会话 {} 被会话 {} 替换", old.id, id);
  }

  pub fn state(&self) -> StreamState {
    self.current().state()
  }

  pub fn status(&self) -> StreamStatus {
    let state = self.state();
    StreamStatus {
      finished: state == StreamState::Finished,
      playing: state == StreamState::Active,
    }
  }

  /// 当前会话账本的快照
  pub fn ledger(&self) -> Ledger {
    self.current().ledger().clone()
  }

  pub fn processed_frames(&self) -> u64 {
    self.current().processed_frames.load(Ordering::SeqCst)
  }

  pub fn session_id(&self) -> u64 {
    self.current().id
  }
}

/// 一次会话的有限帧序列，不可重启
pub struct FrameStream<M, Src: FrameSource> {
  session: Arc<Session>,
  source: Option<Src>,
  detector: Arc<VehicleDetector<M>>,
  encoder: Arc<FrameEncoder>,
  engine: Arc<AnalyticsEngine>,
  artifacts: Arc<Mutex<()>>,
  poll_interval: Duration,
  outcome: Option<AnalyticsOutcome>,
}

impl<M, Src: FrameSource> FrameStream<M, Src> {
  /// 输入耗尽后完整统计分析的结果
  pub fn outcome(&self) -> Option<&AnalyticsOutcome> {
    self.outcome.as_ref()
  }

  pub fn is_closed(&self) -> bool {
    self.source.is_none()
  }

  fn release_source(&mut self) {
    if self.source.take().is_some() {
      info!(
        "会话 {} 共处理 {} 帧",
        self.session.id,
        self.session.processed_frames.load(Ordering::SeqCst)
      );
    }
  }

  fn finish(&mut self) {
    self.release_source();
    let artifacts = self.artifacts.clone();
    let _artifacts = artifacts.lock().unwrap_or_else(PoisonError::into_inner);
    if self.session.superseded.load(Ordering::SeqCst) {
      return;
    }
    self.session.finished.store(true, Ordering::SeqCst);
    if self.session.analyzed.swap(true, Ordering::SeqCst) {
      return;
    }
    info!("会话 {} 输入结束，生成统计分析", self.session.id);
    let ledger = self.session.ledger().clone();
    self.outcome = Some(self.engine.run(ledger.as_slice()));
  }

  /// 提前结束：释放输入，只保存已有的检测汇总
  fn close(&mut self) {
    self.release_source();
    let _artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
    if self.session.superseded.load(Ordering::SeqCst)
      || self.session.analyzed.swap(true, Ordering::SeqCst)
    {
      return;
    }
    info!("会话 {} 提前结束，保存检测汇总", self.session.id);
    let ledger = self.session.ledger().clone();
    if let Err(e) = self.engine.persist_summary(ledger.as_slice()) {
      warn!("检测汇总未写出: {}", e);
    }
  }
}

impl<M, E, Src> Iterator for FrameStream<M, Src>
where
  M: Model<Input = Frame, Output = DetectResult, Error = E>,
  E: std::error::Error + Send + Sync + 'static,
  Src: FrameSource,
{
  type Item = Result<EncodedFrame, StreamError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if self.source.is_none() {
        return None;
      }
      if self.session.superseded.load(Ordering::SeqCst) {
        info!("会话 {} 已被替换，停止推流", self.session.id);
        self.release_source();
        return None;
      }
      if !self.session.active.load(Ordering::SeqCst) {
        std::thread::sleep(self.poll_interval);
        continue;
      }

      let next = self.source.as_mut().and_then(|source| source.next());
      let frame = match next {
        None => {
          self.finish();
          return None;
        }
        Some(Err(InputError::SourceRead(e))) => {
          warn!("帧读取失败，按输入结束处理: {}", e);
          self.finish();
          return None;
        }
        Some(Err(e)) => {
          error!("输入错误: {}", e);
          self.close();
          return Some(Err(e.into()));
        }
        Some(Ok(frame)) => frame,
      };

      let detected = match self.detector.detect(&frame) {
        Ok(detected) => detected,
        Err(e) => {
          error!("帧 {} 检测失败: {}", frame.index, e);
          self.close();
          return Some(Err(e.into()));
        }
      };

      self.session.ledger().append(detected.detections.iter().cloned());
      self.session.processed_frames.fetch_add(1, Ordering::SeqCst);
      debug!(
        "帧 {} 检测到 {} 辆车",
        detected.frame.index,
        detected.detections.len()
      );

      return Some(
        self
          .encoder
          .render_result(&detected.frame, detected.detections.as_slice())
          .map_err(StreamError::from),
      );
    }
  }
}

impl<M, Src: FrameSource> Drop for FrameStream<M, Src> {
  fn drop(&mut self) {
    if self.source.is_some() {
      self.close();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ledger_keeps_insertion_order() {
    use crate::detector::{BoundingBox, VehicleClass};

    let mut ledger = Ledger::default();
    let det = |class| Detection {
      class,
      confidence: 0.9,
      bbox: BoundingBox::new(0, 0, 1, 1),
    };
    ledger.append([det(VehicleClass::Bus)]);
    ledger.append(Vec::new());
    ledger.append([det(VehicleClass::Car), det(VehicleClass::Truck)]);

    let classes: Vec<_> = ledger.iter().map(|d| d.class).collect();
    assert_eq!(
      classes,
      vec![VehicleClass::Bus, VehicleClass::Car, VehicleClass::Truck]
    );
    assert_eq!(ledger.len(), 3);
  }

  #[test]
  fn session_state_follows_flags() {
    let session = Session::new(0);
    assert_eq!(session.state(), StreamState::Active);
    session.active.store(false, Ordering::SeqCst);
    assert_eq!(session.state(), StreamState::Paused);
    session.finished.store(true, Ordering::SeqCst);
    assert_eq!(session.state(), StreamState::Finished);
  }

  #[test]
  fn status_serializes_as_flags() {
    let status = StreamStatus {
      finished: false,
      playing: true,
    };
    assert_eq!(
      serde_json::to_string(&status).unwrap(),
      r#"{"finished":false,"playing":true}"#
    );
  }
}
