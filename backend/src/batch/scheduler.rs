//! 批次调度器
//!
//! 每个批次启动固定数量的执行槽位，槽位各自循环：
//! 1. 在生命周期闸门内检查状态并从队列取条目（取条目与 active 计数在同一临界区）
//! 2. 调用处理策略（唯一的挂起点）
//! 3. 记录结果、更新计数、发布事件，再由闸门决定是否推进批次状态
//!
//! 暂停与取消都是协作式的：进行中的条目总会跑完，槽位只是不再取新条目。

use super::events::{EventSink, ProgressEvent, ProgressEventKind};
use super::item::{BatchItem, ItemFailure, StrategyResult, WorkItem};
use super::progress::{ProgressAggregator, ProgressSnapshot};
use super::queue::WorkQueue;
use super::slot_pool::{SlotPool, SlotStatus};
use super::state::BatchState;
use super::{BatchError, BatchResult};
use crate::config::BatchSettings;
use crate::strategy::{FailureKind, ItemProcessor, ProcessingConfig};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 槽位下一步动作
enum SlotStep {
    /// 处理取到的条目
    Work(WorkItem),
    /// 批次暂停中，等待状态变化
    Wait,
    /// 没有更多工作，槽位退出
    Exit,
}

type Transition = (BatchState, BatchState);

/// 一个运行中的批次
pub struct BatchRun {
    id: String,
    config: Arc<ProcessingConfig>,
    concurrency: usize,
    created_at: DateTime<Utc>,
    /// 提交顺序
    order: Vec<String>,
    /// 条目记录
    items: RwLock<HashMap<String, BatchItem>>,
    queue: WorkQueue<WorkItem>,
    /// 暂停时从队列取出的条目，恢复时放回
    parked: Mutex<Vec<WorkItem>>,
    /// 取消时从队列取出的条目
    drained: Mutex<Vec<WorkItem>>,
    progress: ProgressAggregator,
    slots: Arc<SlotPool>,
    /// 生命周期闸门：状态读写、取条目都在这把锁内完成
    gate: Mutex<BatchState>,
    /// 状态广播（唤醒等待中的槽位、外部等待完成）
    state_tx: watch::Sender<BatchState>,
    events: EventSink,
    /// 取消或结束时触发
    stop_token: CancellationToken,
    /// 进入终止状态的时间
    finished_at: Mutex<Option<DateTime<Utc>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRun")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("concurrency", &self.concurrency)
            .field("total", &self.order.len())
            .finish()
    }
}

impl BatchRun {
    /// 创建批次（Idle 状态），条目按提交顺序入队
    pub fn new(
        id: String,
        items: Vec<WorkItem>,
        config: ProcessingConfig,
        concurrency: usize,
        event_capacity: usize,
    ) -> Arc<Self> {
        let order: Vec<String> = items.iter().map(|i| i.key.clone()).collect();
        let records = items
            .iter()
            .map(|i| (i.key.clone(), BatchItem::new(i)))
            .collect();
        let workers = concurrency.min(items.len()).max(1);

        let queue = WorkQueue::new();
        queue.enqueue(items);

        let (state_tx, _) = watch::channel(BatchState::Idle);

        Arc::new(Self {
            id,
            config: Arc::new(config),
            concurrency,
            created_at: Utc::now(),
            progress: ProgressAggregator::new(order.len()),
            order,
            items: RwLock::new(records),
            queue,
            parked: Mutex::new(Vec::new()),
            drained: Mutex::new(Vec::new()),
            slots: Arc::new(SlotPool::new(workers)),
            gate: Mutex::new(BatchState::Idle),
            state_tx,
            events: EventSink::new(event_capacity),
            stop_token: CancellationToken::new(),
            finished_at: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 进入终止状态的时间，未结束时为 None
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock()
    }

    /// 当前状态
    pub fn state(&self) -> BatchState {
        *self.state_tx.borrow()
    }

    /// 进度快照
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.snapshot(&self.id, self.state())
    }

    /// 按提交顺序返回条目记录
    pub fn items(&self) -> Vec<BatchItem> {
        let items = self.items.read();
        self.order
            .iter()
            .filter_map(|key| items.get(key).cloned())
            .collect()
    }

    pub fn slot_status(&self) -> Vec<SlotStatus> {
        self.slots.status()
    }

    /// 取消时回收的条目
    pub fn drained(&self) -> Vec<WorkItem> {
        self.drained.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// 启动槽位
    pub fn start(self: &Arc<Self>, processor: Arc<dyn ItemProcessor>, settings: &BatchSettings) {
        let transition = {
            let mut gate = self.gate.lock();
            self.set_state(&mut gate, BatchState::Running)
        };
        let Some(transition) = transition else {
            warn!("批次 {} 已启动过，忽略重复启动", self.id);
            return;
        };
        self.after_transitions(&[transition]);

        self.slots.start_stale_monitor(
            self.id.clone(),
            settings.stale_check_interval(),
            settings.stale_warning(),
            self.stop_token.clone(),
        );

        let mut workers = self.workers.lock();
        for slot_id in 0..self.slots.size() {
            let run = self.clone();
            let processor = processor.clone();
            workers.push(tokio::spawn(async move {
                run.run_slot(slot_id, processor).await;
            }));
        }

        info!(
            "🚀 批次 {} 已启动: 条目数={}, 并发槽位={}",
            self.id,
            self.order.len(),
            self.slots.size()
        );
    }

    /// 暂停：不再取新条目，进行中的条目允许跑完
    pub fn pause(&self) -> BatchResult<BatchState> {
        let transitions = {
            let mut gate = self.gate.lock();
            match *gate {
                BatchState::Running => {
                    let pending = self.queue.drain();
                    self.parked.lock().extend(pending);

                    let mut transitions = Vec::new();
                    transitions.extend(self.set_state(&mut gate, BatchState::Pausing));
                    if self.progress.active() == 0 {
                        transitions.extend(self.set_state(&mut gate, BatchState::Paused));
                    }
                    transitions
                }
                BatchState::Pausing | BatchState::Paused => {
                    debug!("批次 {} 已在暂停中，忽略", self.id);
                    Vec::new()
                }
                state => return Err(self.invalid_state(state, "暂停")),
            }
        };

        self.after_transitions(&transitions);
        Ok(self.state())
    }

    /// 恢复：把暂停时取出的条目放回同一个队列，槽位从空闲状态继续
    pub fn resume(&self) -> BatchResult<BatchState> {
        let transitions = {
            let mut gate = self.gate.lock();
            match *gate {
                BatchState::Paused => {
                    let parked = std::mem::take(&mut *self.parked.lock());
                    self.queue.requeue(parked);

                    let mut transitions = Vec::new();
                    transitions.extend(self.set_state(&mut gate, BatchState::Running));
                    if self.queue.is_empty() && self.progress.active() == 0 {
                        transitions.extend(self.set_state(&mut gate, BatchState::Completed));
                    }
                    transitions
                }
                BatchState::Running => {
                    debug!("批次 {} 已在运行中，忽略", self.id);
                    Vec::new()
                }
                // 进行中的条目跑完前不能恢复，保持暂停流程
                BatchState::Pausing => {
                    debug!("批次 {} 正在暂停，忽略恢复请求", self.id);
                    Vec::new()
                }
                state => return Err(self.invalid_state(state, "恢复")),
            }
        };

        self.after_transitions(&transitions);
        Ok(self.state())
    }

    /// 取消：回收所有未开始的条目并返回给调用方
    pub fn cancel(&self) -> BatchResult<Vec<WorkItem>> {
        let (drained, transitions) = {
            let mut gate = self.gate.lock();
            match *gate {
                BatchState::Running | BatchState::Pausing | BatchState::Paused => {
                    let mut drained = std::mem::take(&mut *self.parked.lock());
                    drained.extend(self.queue.drain());
                    self.drained.lock().extend(drained.iter().cloned());

                    let mut transitions = Vec::new();
                    transitions.extend(self.set_state(&mut gate, BatchState::Cancelling));
                    if self.progress.active() == 0 {
                        transitions.extend(self.set_state(&mut gate, BatchState::Cancelled));
                    }
                    (drained, transitions)
                }
                BatchState::Cancelling | BatchState::Cancelled => {
                    debug!("批次 {} 已取消，忽略", self.id);
                    (Vec::new(), Vec::new())
                }
                state => return Err(self.invalid_state(state, "取消")),
            }
        };

        if !drained.is_empty() {
            info!("批次 {} 取消，回收 {} 个未开始的条目", self.id, drained.len());
        }
        self.after_transitions(&transitions);
        Ok(drained)
    }

    /// 等待进入终止状态
    pub async fn wait(&self) -> ProgressSnapshot {
        let mut rx = self.state_tx.subscribe();
        loop {
            if rx.borrow_and_update().is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.snapshot()
    }

    /// 槽位主循环
    async fn run_slot(self: Arc<Self>, slot_id: usize, processor: Arc<dyn ItemProcessor>) {
        let mut state_rx = self.state_tx.subscribe();
        debug!("批次 {} 槽位 {} 启动", self.id, slot_id);

        loop {
            // 先标记已读，再进闸门检查，避免错过检查之后的状态变化
            state_rx.borrow_and_update();

            match self.next_step(slot_id) {
                SlotStep::Work(item) => {
                    self.emit(ProgressEventKind::ItemActivated {
                        key: item.key.clone(),
                        slot_id,
                    });

                    let result = self.execute(&item, processor.clone()).await;
                    self.finish_item(slot_id, &item, result);
                }
                SlotStep::Wait => {
                    tokio::select! {
                        _ = self.stop_token.cancelled() => break,
                        changed = state_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                SlotStep::Exit => break,
            }
        }

        debug!("批次 {} 槽位 {} 退出", self.id, slot_id);
    }

    /// 在闸门内决定下一步；取条目与 active 计数同时完成
    fn next_step(&self, slot_id: usize) -> SlotStep {
        let gate = self.gate.lock();
        match *gate {
            BatchState::Running => match self.queue.pull() {
                Some(item) => {
                    self.progress.mark_active();
                    self.slots.assign(slot_id, &item.key);
                    if let Some(record) = self.items.write().get_mut(&item.key) {
                        record.mark_active(slot_id);
                    }
                    SlotStep::Work(item)
                }
                None => SlotStep::Exit,
            },
            BatchState::Idle | BatchState::Pausing | BatchState::Paused => SlotStep::Wait,
            BatchState::Cancelling | BatchState::Cancelled | BatchState::Completed => {
                SlotStep::Exit
            }
        }
    }

    /// 调用处理策略；策略 panic 也只记为该条目失败
    async fn execute(&self, item: &WorkItem, processor: Arc<dyn ItemProcessor>) -> StrategyResult {
        let config = self.config.clone();
        let work = item.clone();
        let handle =
            tokio::spawn(async move { processor.process(&work, &config).await });

        match handle.await {
            Ok(result) => result.into(),
            Err(e) => {
                error!("批次 {} 条目 {} 处理任务异常: {}", self.id, item.key, e);
                StrategyResult::Failure(ItemFailure {
                    kind: FailureKind::Internal,
                    message: format!("处理任务异常退出: {}", e),
                })
            }
        }
    }

    /// 记录条目结果并推进批次状态
    fn finish_item(&self, slot_id: usize, item: &WorkItem, result: StrategyResult) {
        let success = result.is_success();
        let kind = match &result {
            StrategyResult::Success(_) => ProgressEventKind::ItemFinished {
                key: item.key.clone(),
            },
            StrategyResult::Failure(failure) => {
                warn!(
                    "批次 {} 条目 {} 处理失败: {}",
                    self.id, item.key, failure.message
                );
                ProgressEventKind::ItemFailed {
                    key: item.key.clone(),
                    kind: failure.kind,
                    message: failure.message.clone(),
                }
            }
        };

        if let Some(record) = self.items.write().get_mut(&item.key) {
            record.mark_finished(result);
        }
        self.slots.release(slot_id);
        self.progress.mark_finished(success);

        let snapshot = self.snapshot();
        debug!(
            "批次 {} 进度 {}/{} ({:.1}%)，预计剩余 {}",
            self.id,
            snapshot.done_count(),
            snapshot.total,
            snapshot.percent,
            snapshot.eta_display()
        );

        self.emit(kind);
        self.settle();
    }

    /// 没有进行中的条目时推进 Pausing/Cancelling/Running 的后续状态
    fn settle(&self) {
        let transition = {
            let mut gate = self.gate.lock();
            let idle = self.progress.active() == 0;
            let next = match *gate {
                BatchState::Running if idle && self.queue.is_empty() => Some(BatchState::Completed),
                BatchState::Pausing if idle => Some(BatchState::Paused),
                BatchState::Cancelling if idle => Some(BatchState::Cancelled),
                _ => None,
            };
            next.and_then(|next| self.set_state(&mut gate, next))
        };

        if let Some(transition) = transition {
            self.after_transitions(&[transition]);
        }
    }

    /// 迁移状态（调用方持有闸门）
    fn set_state(&self, gate: &mut BatchState, next: BatchState) -> Option<Transition> {
        let prev = *gate;
        if !prev.can_transition_to(next) {
            return None;
        }
        *gate = next;
        if next.is_terminal() {
            *self.finished_at.lock() = Some(Utc::now());
        }
        self.state_tx.send_replace(next);
        Some((prev, next))
    }

    /// 迁移后的副作用（在闸门外执行）
    fn after_transitions(&self, transitions: &[Transition]) {
        for &(from, to) in transitions {
            match to {
                BatchState::Paused => self.progress.pause_clock(),
                BatchState::Running => self.progress.resume_clock(),
                BatchState::Cancelling => self.stop_token.cancel(),
                BatchState::Completed | BatchState::Cancelled => {
                    self.progress.stop_clock();
                    self.stop_token.cancel();
                    self.slots.shutdown();
                }
                _ => {}
            }

            if to.is_terminal() {
                let snapshot = self.snapshot();
                info!(
                    "✅ 批次 {} {}: 成功 {}，失败 {}，未处理 {}，耗时 {:.1}s",
                    self.id,
                    to,
                    snapshot.finished_count,
                    snapshot.errored_count,
                    snapshot.queued_count,
                    snapshot.elapsed_secs
                );
            } else {
                info!("批次 {} 状态变更: {} -> {}", self.id, from, to);
            }

            self.emit(ProgressEventKind::StateChanged { from, to });
        }
    }

    fn emit(&self, kind: ProgressEventKind) {
        self.events.emit(ProgressEvent {
            batch_id: self.id.clone(),
            kind,
            snapshot: self.snapshot(),
        });
    }

    fn invalid_state(&self, state: BatchState, action: &'static str) -> BatchError {
        BatchError::InvalidState {
            batch_id: self.id.clone(),
            state,
            action,
        }
    }
}
