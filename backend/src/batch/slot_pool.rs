//! 执行槽位表
//!
//! 记录批次内每个并发槽位当前持有的条目，用于：
//! - 对外展示槽位占用情况
//! - 校验同一时刻一个槽位最多持有一个条目
//! - 巡检长时间未结束的条目（只告警，不释放、不抢占）

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 执行槽位
#[derive(Debug, Clone)]
pub struct Slot {
    /// 槽位ID
    pub id: usize,
    /// 当前持有的条目键
    pub item_key: Option<String>,
    /// 条目分配时间
    pub allocated_at: Option<Instant>,
}

impl Slot {
    fn new(id: usize) -> Self {
        Self {
            id,
            item_key: None,
            allocated_at: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.item_key.is_none()
    }

    fn assign(&mut self, key: &str) {
        self.item_key = Some(key.to_string());
        self.allocated_at = Some(Instant::now());
    }

    fn release(&mut self) -> Option<String> {
        self.allocated_at = None;
        self.item_key.take()
    }
}

/// 槽位状态（对外展示）
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot_id: usize,
    pub item_key: Option<String>,
    /// 已持有当前条目的秒数
    pub held_secs: Option<u64>,
}

/// 槽位表
#[derive(Debug)]
pub struct SlotPool {
    slots: RwLock<Vec<Slot>>,
    /// 巡检任务句柄
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SlotPool {
    pub fn new(size: usize) -> Self {
        Self {
            slots: RwLock::new((0..size).map(Slot::new).collect()),
            monitor_handle: Mutex::new(None),
        }
    }

    pub fn size(&self) -> usize {
        self.slots.read().len()
    }

    /// 槽位开始持有条目
    pub fn assign(&self, slot_id: usize, key: &str) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(slot_id) {
            if let Some(ref held) = slot.item_key {
                warn!("槽位 {} 仍持有条目 {}，被 {} 覆盖", slot_id, held, key);
            }
            slot.assign(key);
            debug!("槽位 {} 开始处理: {}", slot_id, key);
        }
    }

    /// 释放槽位，返回之前持有的条目键
    pub fn release(&self, slot_id: usize) -> Option<String> {
        let mut slots = self.slots.write();
        slots.get_mut(slot_id).and_then(|slot| slot.release())
    }

    /// 所有槽位状态
    pub fn status(&self) -> Vec<SlotStatus> {
        self.slots
            .read()
            .iter()
            .map(|s| SlotStatus {
                slot_id: s.id,
                item_key: s.item_key.clone(),
                held_secs: s.allocated_at.map(|t| t.elapsed().as_secs()),
            })
            .collect()
    }

    /// 持有条目超过阈值的槽位
    pub fn stale_slots(&self, threshold: Duration) -> Vec<(usize, String, Duration)> {
        self.slots
            .read()
            .iter()
            .filter_map(|s| match (&s.item_key, s.allocated_at) {
                (Some(key), Some(at)) if at.elapsed() >= threshold => {
                    Some((s.id, key.clone(), at.elapsed()))
                }
                _ => None,
            })
            .collect()
    }

    /// 启动巡检任务，直到 token 被取消
    pub fn start_stale_monitor(
        self: &Arc<Self>,
        batch_id: String,
        interval: Duration,
        threshold: Duration,
        token: CancellationToken,
    ) {
        let pool = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for (slot_id, key, held) in pool.stale_slots(threshold) {
                            warn!(
                                "⚠️ 批次 {} 槽位 {} 处理 {} 已超过 {} 秒（调度器不会中断该条目）",
                                batch_id,
                                slot_id,
                                key,
                                held.as_secs()
                            );
                        }
                    }
                }
            }

            debug!("批次 {} 槽位巡检任务已停止", batch_id);
        });

        if let Some(old) = self.monitor_handle.lock().replace(handle) {
            old.abort();
        }
        info!("槽位巡检任务已启动，间隔 {:?}，阈值 {:?}", interval, threshold);
    }

    /// 停止巡检任务
    pub fn shutdown(&self) {
        if let Some(handle) = self.monitor_handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for SlotPool {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor_handle.get_mut().take() {
            handle.abort();
        }
    }
}
