//! 进度事件节流
//!
//! 条目级事件（开始、完成）按时间间隔节流；
//! 失败与批次状态变化总是推送。被跳过的事件不会补发，
//! 下一条推送携带的快照已经包含最新计数。

use crate::batch::{ProgressEvent, ProgressEventKind};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// 事件节流器
#[derive(Debug)]
pub struct EventThrottler {
    last_emit: Mutex<Option<Instant>>,
    interval: Duration,
}

impl EventThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_emit: Mutex::new(None),
            interval,
        }
    }

    /// 0 表示不节流
    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 是否推送该事件
    pub fn admit(&self, event: &ProgressEvent) -> bool {
        match event.kind {
            ProgressEventKind::StateChanged { .. } | ProgressEventKind::ItemFailed { .. } => {
                *self.last_emit.lock() = Some(Instant::now());
                true
            }
            _ => self.should_emit(),
        }
    }

    fn should_emit(&self) -> bool {
        if self.interval.is_zero() {
            return true;
        }

        let now = Instant::now();
        let mut last = self.last_emit.lock();
        match *last {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
