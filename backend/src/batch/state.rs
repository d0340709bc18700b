//! 批次生命周期
//!
//! Idle -> Running -> { Pausing -> Paused -> Running | Cancelling -> Cancelled | Completed }
//!
//! 暂停中的批次同样可以取消（Pausing/Paused -> Cancelling）。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 批次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Idle,
    Running,
    Pausing,
    Paused,
    Cancelling,
    Cancelled,
    Completed,
}

impl BatchState {
    /// 终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Cancelled | BatchState::Completed)
    }

    /// 状态迁移是否合法
    pub fn can_transition_to(&self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (*self, next),
            (Idle, Running)
                | (Running, Pausing)
                | (Running, Cancelling)
                | (Running, Completed)
                | (Pausing, Paused)
                | (Pausing, Cancelling)
                | (Paused, Running)
                | (Paused, Cancelling)
                | (Cancelling, Cancelled)
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Idle => "idle",
            BatchState::Running => "running",
            BatchState::Pausing => "pausing",
            BatchState::Paused => "paused",
            BatchState::Cancelling => "cancelling",
            BatchState::Cancelled => "cancelled",
            BatchState::Completed => "completed",
        };
        f.write_str(name)
    }
}
