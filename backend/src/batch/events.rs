//! 进度事件
//!
//! 每次状态迁移（条目开始、完成、失败、批次状态变化）发布一条事件。
//! 通道有界，发送即忘：订阅者跟不上时丢弃最旧的事件，不会阻塞槽位。

use super::progress::ProgressSnapshot;
use super::state::BatchState;
use crate::strategy::FailureKind;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEventKind {
    ItemActivated {
        key: String,
        slot_id: usize,
    },
    ItemFinished {
        key: String,
    },
    ItemFailed {
        key: String,
        kind: FailureKind,
        message: String,
    },
    StateChanged {
        from: BatchState,
        to: BatchState,
    },
}

/// 进度事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub batch_id: String,
    #[serde(flatten)]
    pub kind: ProgressEventKind,
    pub snapshot: ProgressSnapshot,
}

impl ProgressEvent {
    /// 是否为进入终止状态的事件
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ProgressEventKind::StateChanged { to, .. } if to.is_terminal())
    }
}

/// 事件发布端
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 发布事件，没有订阅者时直接丢弃
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
