// 该文件是 Spirocount （螺旋体计数） 项目的一部分。
// src/gate.rs - 图像就绪门
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

//! 一次性赋值的同步单元。
//!
//! 读端 [`ReadinessGate`] 可以克隆给任意多个线程等待，写端 [`GateCompleter`]
//! 只有一个，完成时被消费掉。写端在未完成的情况下被丢弃，门会进入放弃状态，
//! 等待者得到 [`GateError::Abandoned`] 而不是永远阻塞。

use std::{
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
  #[error("等待超时: {0:?}")]
  Timeout(Duration),
  #[error("写端在完成前被丢弃")]
  Abandoned,
}

#[derive(Debug)]
enum Slot<T> {
  Pending,
  Ready(T),
  Abandoned,
}

impl<T> Slot<T> {
  fn is_pending(&self) -> bool {
    matches!(self, Slot::Pending)
  }
}

#[derive(Debug)]
struct Shared<T> {
  slot: Mutex<Slot<T>>,
  signal: Condvar,
}

impl<T> Shared<T> {
  fn lock(&self) -> MutexGuard<'_, Slot<T>> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn settle(&self, value: Slot<T>) {
    let mut slot = self.lock();
    if slot.is_pending() {
      *slot = value;
      self.signal.notify_all();
    }
  }
}

/// 就绪门的读端
#[derive(Debug)]
pub struct ReadinessGate<T> {
  shared: Arc<Shared<T>>,
}

impl<T> Clone for ReadinessGate<T> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

/// 就绪门的写端，只能完成一次
#[derive(Debug)]
pub struct GateCompleter<T> {
  shared: Option<Arc<Shared<T>>>,
}

impl<T: Clone> ReadinessGate<T> {
  pub fn new() -> (Self, GateCompleter<T>) {
    let shared = Arc::new(Shared {
      slot: Mutex::new(Slot::Pending),
      signal: Condvar::new(),
    });
    let completer = GateCompleter {
      shared: Some(Arc::clone(&shared)),
    };
    (Self { shared }, completer)
  }

  /// 已经完成好的门
  pub fn ready(value: T) -> Self {
    let (gate, completer) = Self::new();
    completer.complete(value);
    gate
  }

  pub fn is_available(&self) -> bool {
    !self.shared.lock().is_pending()
  }

  pub fn try_get(&self) -> Option<T> {
    match &*self.shared.lock() {
      Slot::Ready(value) => Some(value.clone()),
      _ => None,
    }
  }

  /// 阻塞直到写端完成
  pub fn wait(&self) -> Result<T, GateError> {
    let slot = self
      .shared
      .signal
      .wait_while(self.shared.lock(), |slot| slot.is_pending())
      .unwrap_or_else(PoisonError::into_inner);
    Self::read(&slot)
  }

  /// 最多等待 `timeout`，超时后返回 [`GateError::Timeout`]
  pub fn wait_timeout(&self, timeout: Duration) -> Result<T, GateError> {
    let (slot, result) = self
      .shared
      .signal
      .wait_timeout_while(self.shared.lock(), timeout, |slot| slot.is_pending())
      .unwrap_or_else(PoisonError::into_inner);
    if result.timed_out() && slot.is_pending() {
      warn!("等待图像就绪超时: {:?}", timeout);
      return Err(GateError::Timeout(timeout));
    }
    Self::read(&slot)
  }

  fn read(slot: &Slot<T>) -> Result<T, GateError> {
    match slot {
      Slot::Ready(value) => Ok(value.clone()),
      Slot::Abandoned => Err(GateError::Abandoned),
      Slot::Pending => unreachable!("wait returned while the gate is still pending"),
    }
  }
}

impl<T> GateCompleter<T> {
  pub fn complete(mut self, value: T) {
    if let Some(shared) = self.shared.take() {
      shared.settle(Slot::Ready(value));
    }
  }
}

impl<T> Drop for GateCompleter<T> {
  fn drop(&mut self) {
    if let Some(shared) = self.shared.take() {
      debug!("就绪门写端未完成即被丢弃");
      shared.settle(Slot::Abandoned);
    }
  }
}
