//! 进度汇总
//!
//! 所有槽位共享的计数器。四个计数放在同一把锁里更新，
//! 任意时刻读到的快照都满足 queued + active + finished + errored == total。

use super::state::BatchState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// 计数器
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ProgressCounts {
    active: usize,
    finished: usize,
    errored: usize,
}

/// 计时（暂停期间不计入耗时）
#[derive(Debug)]
struct RunClock {
    started: Instant,
    paused_total: Duration,
    paused_since: Option<Instant>,
    stopped_at: Option<Instant>,
}

impl RunClock {
    fn effective_elapsed(&self) -> Duration {
        let now = self.stopped_at.unwrap_or_else(Instant::now);
        let mut paused = self.paused_total;
        if let Some(since) = self.paused_since {
            paused += now.saturating_duration_since(since);
        }
        now.saturating_duration_since(self.started)
            .saturating_sub(paused)
    }
}

/// 进度快照（只读视图，按需从计数器重算）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub batch_id: String,
    pub state: BatchState,
    pub total: usize,
    pub queued_count: usize,
    pub active_count: usize,
    pub finished_count: usize,
    pub errored_count: usize,
    /// 完成百分比 (0.0 - 100.0)
    pub percent: f64,
    pub started_at: DateTime<Utc>,
    /// 有效耗时（不含暂停）
    pub elapsed_secs: f64,
    /// 预计剩余时间（秒），至少完成一个条目前为 None
    pub estimated_remaining_secs: Option<u64>,
}

impl ProgressSnapshot {
    /// 已结束（成功 + 失败）的条目数
    pub fn done_count(&self) -> usize {
        self.finished_count + self.errored_count
    }

    /// 可读的剩余时间
    pub fn eta_display(&self) -> String {
        match self.estimated_remaining_secs {
            Some(secs) => format_eta(secs),
            None => "未知".to_string(),
        }
    }
}

/// 进度汇总器
#[derive(Debug)]
pub struct ProgressAggregator {
    total: usize,
    counts: Mutex<ProgressCounts>,
    started_at: DateTime<Utc>,
    clock: Mutex<RunClock>,
}

impl ProgressAggregator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            counts: Mutex::new(ProgressCounts::default()),
            started_at: Utc::now(),
            clock: Mutex::new(RunClock {
                started: Instant::now(),
                paused_total: Duration::ZERO,
                paused_since: None,
                stopped_at: None,
            }),
        }
    }

    /// 条目开始处理
    pub fn mark_active(&self) {
        let mut counts = self.counts.lock();
        counts.active += 1;
    }

    /// 条目处理结束
    pub fn mark_finished(&self, success: bool) {
        let mut counts = self.counts.lock();
        counts.active = counts.active.saturating_sub(1);
        if success {
            counts.finished += 1;
        } else {
            counts.errored += 1;
        }
    }

    /// 当前处理中的条目数
    pub fn active(&self) -> usize {
        self.counts.lock().active
    }

    /// 暂停计时（幂等）
    pub fn pause_clock(&self) {
        let mut clock = self.clock.lock();
        if clock.paused_since.is_none() && clock.stopped_at.is_none() {
            clock.paused_since = Some(Instant::now());
        }
    }

    /// 恢复计时（幂等）
    pub fn resume_clock(&self) {
        let mut clock = self.clock.lock();
        if let Some(since) = clock.paused_since.take() {
            clock.paused_total += since.elapsed();
        }
    }

    /// 批次结束，冻结耗时
    pub fn stop_clock(&self) {
        let mut clock = self.clock.lock();
        if clock.stopped_at.is_none() {
            let now = Instant::now();
            if let Some(since) = clock.paused_since.take() {
                clock.paused_total += now.saturating_duration_since(since);
            }
            clock.stopped_at = Some(now);
        }
    }

    /// 生成快照
    pub fn snapshot(&self, batch_id: &str, state: BatchState) -> ProgressSnapshot {
        let counts = *self.counts.lock();
        let elapsed = self.clock.lock().effective_elapsed();

        let done = counts.finished + counts.errored;
        let queued = self.total.saturating_sub(counts.active + done);
        let remaining = queued + counts.active;

        let percent = if self.total == 0 {
            0.0
        } else {
            done as f64 / self.total as f64 * 100.0
        };

        ProgressSnapshot {
            batch_id: batch_id.to_string(),
            state,
            total: self.total,
            queued_count: queued,
            active_count: counts.active,
            finished_count: counts.finished,
            errored_count: counts.errored,
            percent,
            started_at: self.started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            estimated_remaining_secs: estimate_remaining(elapsed, done, remaining),
        }
    }
}

/// 平均单条耗时 × 剩余条目数；尚无完成条目时无法估算
pub fn estimate_remaining(elapsed: Duration, completed: usize, remaining: usize) -> Option<u64> {
    if completed == 0 {
        return None;
    }
    let per_item = elapsed.as_secs_f64() / completed as f64;
    Some((per_item * remaining as f64).round() as u64)
}

/// 格式化剩余时间
pub fn format_eta(seconds: u64) -> String {
    if seconds == 0 {
        return "即将完成".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}小时{}分钟", hours, minutes)
    } else if minutes > 0 {
        format!("{}分钟{}秒", minutes, secs)
    } else {
        format!("{}秒", secs)
    }
}
