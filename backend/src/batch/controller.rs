//! 批次控制器
//!
//! 管理所有批次：创建、暂停、恢复、取消、查询与清理。
//! 控制操作只改变批次状态，实际的调度由每个批次自己的槽位完成。

use super::events::ProgressEvent;
use super::item::{BatchItem, WorkItem};
use super::progress::ProgressSnapshot;
use super::scheduler::BatchRun;
use super::slot_pool::SlotStatus;
use super::state::BatchState;
use super::{BatchError, BatchResult};
use crate::config::BatchSettings;
use crate::strategy::{ItemProcessor, ProcessingConfig};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// 批次创建结果
#[derive(Debug, Clone, Serialize)]
pub struct BatchHandle {
    pub batch_id: String,
    pub total: usize,
    pub concurrency: usize,
}

/// 批次详情
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    pub snapshot: ProgressSnapshot,
    pub concurrency: usize,
    pub config: ProcessingConfig,
    pub created_at: DateTime<Utc>,
    pub items: Vec<BatchItem>,
    pub slots: Vec<SlotStatus>,
    /// 取消时未开始、被回收的条目键
    pub drained: Vec<String>,
}

/// 批次控制器
pub struct BatchController {
    batches: DashMap<String, Arc<BatchRun>>,
    processor: Arc<dyn ItemProcessor>,
    settings: BatchSettings,
}

impl std::fmt::Debug for BatchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchController")
            .field("batches", &self.batches.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl BatchController {
    pub fn new(processor: Arc<dyn ItemProcessor>, settings: BatchSettings) -> Self {
        info!(
            "创建批次控制器: 最大并发={}, 默认并发={}",
            settings.max_concurrency, settings.default_concurrency
        );
        Self {
            batches: DashMap::new(),
            processor,
            settings,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// 创建并启动批次
    ///
    /// 参数问题（空批次、并发数越界、重复条目、配置不可用）同步返回，不会创建批次。
    /// 必须在 tokio 运行时中调用。
    pub fn start(
        &self,
        items: Vec<WorkItem>,
        config: ProcessingConfig,
        concurrency: Option<usize>,
    ) -> BatchResult<BatchHandle> {
        let concurrency = concurrency.unwrap_or(self.settings.default_concurrency);

        if items.is_empty() {
            return Err(BatchError::InvalidArgument("批次中没有条目".to_string()));
        }
        self.settings
            .validate_concurrency(concurrency)
            .map_err(BatchError::InvalidArgument)?;

        let mut seen = HashSet::with_capacity(items.len());
        if let Some(dup) = items.iter().find(|i| !seen.insert(i.key.as_str())) {
            return Err(BatchError::InvalidArgument(format!(
                "条目重复: {}",
                dup.key
            )));
        }

        config.validate().map_err(BatchError::InvalidArgument)?;
        self.processor
            .check_ready(&config)
            .map_err(|e| BatchError::InvalidArgument(e.to_string()))?;

        let batch_id = Uuid::new_v4().to_string();
        let total = items.len();
        let run = BatchRun::new(
            batch_id.clone(),
            items,
            config,
            concurrency,
            self.settings.event_capacity,
        );
        self.batches.insert(batch_id.clone(), run.clone());
        run.start(self.processor.clone(), &self.settings);

        Ok(BatchHandle {
            batch_id,
            total,
            concurrency,
        })
    }

    pub fn pause(&self, batch_id: &str) -> BatchResult<BatchState> {
        self.find(batch_id)?.pause()
    }

    pub fn resume(&self, batch_id: &str) -> BatchResult<BatchState> {
        self.find(batch_id)?.resume()
    }

    /// 取消批次，返回未开始处理的条目
    pub fn cancel(&self, batch_id: &str) -> BatchResult<Vec<WorkItem>> {
        self.find(batch_id)?.cancel()
    }

    pub fn snapshot(&self, batch_id: &str) -> BatchResult<ProgressSnapshot> {
        Ok(self.find(batch_id)?.snapshot())
    }

    pub fn get(&self, batch_id: &str) -> BatchResult<BatchDetail> {
        let run = self.find(batch_id)?;
        Ok(BatchDetail {
            snapshot: run.snapshot(),
            concurrency: run.concurrency(),
            config: run.config().clone(),
            created_at: run.created_at(),
            items: run.items(),
            slots: run.slot_status(),
            drained: run.drained().into_iter().map(|i| i.key).collect(),
        })
    }

    /// 所有批次快照（按创建时间排序）
    pub fn list(&self) -> Vec<ProgressSnapshot> {
        let mut runs: Vec<Arc<BatchRun>> =
            self.batches.iter().map(|e| e.value().clone()).collect();
        runs.sort_by_key(|r| r.created_at());
        runs.iter().map(|r| r.snapshot()).collect()
    }

    /// 订阅进度事件
    pub fn subscribe(&self, batch_id: &str) -> BatchResult<broadcast::Receiver<ProgressEvent>> {
        Ok(self.find(batch_id)?.subscribe())
    }

    /// 等待批次结束
    pub async fn wait(&self, batch_id: &str) -> BatchResult<ProgressSnapshot> {
        let run = self.find(batch_id)?;
        Ok(run.wait().await)
    }

    /// 删除已结束的批次
    pub fn remove(&self, batch_id: &str) -> BatchResult<()> {
        let run = self.find(batch_id)?;
        let state = run.state();
        if !state.is_terminal() {
            return Err(BatchError::InvalidState {
                batch_id: batch_id.to_string(),
                state,
                action: "删除",
            });
        }
        self.batches.remove(batch_id);
        info!("删除批次: {}", batch_id);
        Ok(())
    }

    /// 清除所有已结束的批次
    pub fn clear_finished(&self) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, run| !run.state().is_terminal());
        let removed = before - self.batches.len();
        if removed > 0 {
            info!("清除了 {} 个已结束的批次", removed);
        }
        removed
    }

    /// 清除结束超过保留时长的批次，返回清除数量
    pub fn evict_finished(&self, max_age: Duration) -> usize {
        let now = Utc::now();

        let before = self.batches.len();
        self.batches.retain(|_, run| match run.finished_at() {
            Some(at) => now
                .signed_duration_since(at)
                .to_std()
                .map_or(true, |age| age < max_age),
            None => true,
        });
        let removed = before - self.batches.len();
        if removed > 0 {
            info!("🧹 清除了 {} 个过期的已结束批次", removed);
        }
        removed
    }

    /// 定期清除过期批次，直到 token 被取消
    pub fn start_eviction_task(
        self: &Arc<Self>,
        interval: Duration,
        max_age: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        controller.evict_finished(max_age);
                    }
                }
            }

            debug!("批次清理任务已停止");
        })
    }

    /// 未结束的批次数
    pub fn active_count(&self) -> usize {
        self.batches
            .iter()
            .filter(|e| !e.value().state().is_terminal())
            .count()
    }

    /// 取消所有未结束的批次（服务退出时调用）
    pub fn shutdown(&self) {
        let runs: Vec<Arc<BatchRun>> = self.batches.iter().map(|e| e.value().clone()).collect();
        for run in runs {
            if !run.state().is_terminal() {
                let _ = run.cancel();
            }
        }
    }

    fn find(&self, batch_id: &str) -> BatchResult<Arc<BatchRun>> {
        self.batches
            .get(batch_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::events::ProgressEventKind;
    use crate::batch::item::ItemStatus;
    use crate::strategy::{
        Dimensions, Engine, FailureKind, ItemOutput, Preset, StrategyError,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// 可编排的处理器：按键失败、可用信号量卡住、记录并发峰值
    #[derive(Default)]
    struct ScriptedProcessor {
        fail_keys: HashSet<String>,
        panic_keys: HashSet<String>,
        gate: Option<Arc<Semaphore>>,
        delay: Duration,
        not_ready: bool,
        running: AtomicUsize,
        max_running: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedProcessor {
        fn gated() -> (Arc<Self>, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            let processor = Arc::new(Self {
                gate: Some(gate.clone()),
                ..Default::default()
            });
            (processor, gate)
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }

        fn running(&self) -> usize {
            self.running.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ItemProcessor for ScriptedProcessor {
        async fn process(
            &self,
            item: &WorkItem,
            _config: &ProcessingConfig,
        ) -> Result<ItemOutput, StrategyError> {
            self.seen.lock().push(item.key.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            if let Some(ref gate) = self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panic_keys.contains(&item.key) {
                panic!("{} 触发处理器 panic", item.key);
            }
            if self.fail_keys.contains(&item.key) {
                return Err(StrategyError::Remote(format!("{} 处理失败", item.key)));
            }
            Ok(ItemOutput {
                filename: format!("out-{}", item.key),
                path: PathBuf::from(format!("/tmp/out-{}", item.key)),
                original_dimensions: Dimensions::new(10, 10),
                upscaled_dimensions: Dimensions::new(20, 20),
                original_size: 100,
                upscaled_size: 400,
                format: "png".to_string(),
                method: "scripted".to_string(),
            })
        }

        fn check_ready(&self, _config: &ProcessingConfig) -> Result<(), StrategyError> {
            if self.not_ready {
                return Err(StrategyError::Unavailable("缺少凭证".to_string()));
            }
            Ok(())
        }
    }

    fn work_items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("k{}", i), format!("/tmp/k{}.png", i)))
            .collect()
    }

    fn controller(processor: Arc<ScriptedProcessor>) -> BatchController {
        BatchController::new(processor, BatchSettings::default())
    }

    async fn eventually<F: Fn() -> bool>(cond: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "等待条件超时"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn assert_counts_consistent(s: &ProgressSnapshot) {
        assert_eq!(
            s.queued_count + s.active_count + s.finished_count + s.errored_count,
            s.total
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_all_items_succeed_within_concurrency() {
        let processor = Arc::new(ScriptedProcessor {
            delay: Duration::from_millis(10),
            ..Default::default()
        });
        let ctl = controller(processor.clone());

        let handle = ctl
            .start(work_items(10), ProcessingConfig::default(), Some(2))
            .unwrap();
        let snapshot = ctl.wait(&handle.batch_id).await.unwrap();

        assert_eq!(snapshot.state, BatchState::Completed);
        assert_eq!(snapshot.finished_count, 10);
        assert_eq!(snapshot.errored_count, 0);
        assert_eq!(snapshot.active_count, 0);
        assert_eq!(snapshot.percent, 100.0);
        assert!(processor.max_running.load(Ordering::SeqCst) <= 2);

        let mut seen = processor.seen();
        seen.sort();
        let mut expected: Vec<String> = work_items(10).into_iter().map(|i| i.key).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failures_are_isolated() {
        let processor = Arc::new(ScriptedProcessor {
            fail_keys: ["k1", "k3"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        let ctl = controller(processor.clone());

        let handle = ctl
            .start(work_items(5), ProcessingConfig::default(), Some(3))
            .unwrap();
        let snapshot = ctl.wait(&handle.batch_id).await.unwrap();

        assert_eq!(snapshot.state, BatchState::Completed);
        assert_eq!(snapshot.finished_count, 3);
        assert_eq!(snapshot.errored_count, 2);
        assert_counts_consistent(&snapshot);

        let detail = ctl.get(&handle.batch_id).unwrap();
        let keys: Vec<&str> = detail.items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3", "k4"]);

        let failed = &detail.items[1];
        assert_eq!(failed.status, ItemStatus::Failed);
        assert_eq!(failed.error.as_ref().unwrap().kind, FailureKind::Remote);
        assert!(detail.items[2].output.is_some());
        assert_eq!(detail.items[2].status, ItemStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_processor_fails_only_that_item() {
        let processor = Arc::new(ScriptedProcessor {
            panic_keys: ["k2"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        let ctl = controller(processor.clone());

        let handle = ctl
            .start(work_items(5), ProcessingConfig::default(), Some(3))
            .unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), ctl.wait(&handle.batch_id))
            .await
            .expect("panic 不应让批次卡在运行状态")
            .unwrap();

        assert_eq!(snapshot.state, BatchState::Completed);
        assert_eq!(snapshot.finished_count, 4);
        assert_eq!(snapshot.errored_count, 1);
        assert_counts_consistent(&snapshot);
        assert_eq!(processor.seen().len(), 5);

        let detail = ctl.get(&handle.batch_id).unwrap();
        let panicked = &detail.items[2];
        assert_eq!(panicked.key, "k2");
        assert_eq!(panicked.status, ItemStatus::Failed);
        assert_eq!(panicked.error.as_ref().unwrap().kind, FailureKind::Internal);
        assert!(detail.slots.iter().all(|s| s.item_key.is_none()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pause_then_resume_processes_each_item_once() {
        let (processor, gate) = ScriptedProcessor::gated();
        let ctl = controller(processor.clone());

        let handle = ctl
            .start(work_items(6), ProcessingConfig::default(), Some(2))
            .unwrap();
        let id = handle.batch_id.clone();
        eventually(|| processor.running() == 2).await;

        assert_eq!(ctl.pause(&id).unwrap(), BatchState::Pausing);
        let s = ctl.snapshot(&id).unwrap();
        assert_eq!(s.active_count, 2);
        assert_eq!(s.queued_count, 4);
        assert_counts_consistent(&s);

        // 进行中的条目跑完后进入 Paused，且不再取新条目
        gate.add_permits(2);
        eventually(|| ctl.snapshot(&id).unwrap().state == BatchState::Paused).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(processor.seen().len(), 2);

        let s = ctl.snapshot(&id).unwrap();
        assert_eq!(s.finished_count, 2);
        assert_eq!(s.queued_count, 4);
        assert_eq!(s.active_count, 0);

        assert_eq!(ctl.resume(&id).unwrap(), BatchState::Running);
        gate.add_permits(100);
        let s = ctl.wait(&id).await.unwrap();

        assert_eq!(s.state, BatchState::Completed);
        assert_eq!(s.finished_count, 6);
        let mut seen = processor.seen();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 6);
        assert_eq!(processor.seen().len(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_returns_unstarted_items() {
        let (processor, gate) = ScriptedProcessor::gated();
        let ctl = controller(processor.clone());

        let handle = ctl
            .start(work_items(5), ProcessingConfig::default(), Some(1))
            .unwrap();
        let id = handle.batch_id.clone();
        eventually(|| processor.running() == 1).await;

        let drained = ctl.cancel(&id).unwrap();
        let keys: Vec<&str> = drained.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k2", "k3", "k4"]);
        assert_eq!(ctl.snapshot(&id).unwrap().state, BatchState::Cancelling);

        // 重复取消不报错，也不会再返回条目
        assert!(ctl.cancel(&id).unwrap().is_empty());

        gate.add_permits(1);
        let s = ctl.wait(&id).await.unwrap();
        assert_eq!(s.state, BatchState::Cancelled);
        assert_eq!(s.finished_count, 1);
        assert_eq!(s.queued_count, 4);
        assert_counts_consistent(&s);
        assert_eq!(processor.seen(), vec!["k0".to_string()]);

        let detail = ctl.get(&id).unwrap();
        assert_eq!(detail.drained, vec!["k1", "k2", "k3", "k4"]);
        assert_eq!(detail.items[4].status, ItemStatus::Pending);

        assert!(matches!(
            ctl.pause(&id),
            Err(BatchError::InvalidState { .. })
        ));
        assert!(ctl.cancel(&id).unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_while_paused() {
        let (processor, gate) = ScriptedProcessor::gated();
        let ctl = controller(processor.clone());

        let id = ctl
            .start(work_items(4), ProcessingConfig::default(), Some(2))
            .unwrap()
            .batch_id;
        eventually(|| processor.running() == 2).await;
        ctl.pause(&id).unwrap();
        gate.add_permits(2);
        eventually(|| ctl.snapshot(&id).unwrap().state == BatchState::Paused).await;

        let drained = ctl.cancel(&id).unwrap();
        assert_eq!(drained.len(), 2);

        let s = ctl.wait(&id).await.unwrap();
        assert_eq!(s.state, BatchState::Cancelled);
        assert_eq!(s.finished_count, 2);
        assert_eq!(processor.seen().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_control_idempotence() {
        let (processor, gate) = ScriptedProcessor::gated();
        let ctl = controller(processor.clone());

        let id = ctl
            .start(work_items(3), ProcessingConfig::default(), Some(1))
            .unwrap()
            .batch_id;
        eventually(|| processor.running() == 1).await;

        // 运行中恢复是空操作
        assert_eq!(ctl.resume(&id).unwrap(), BatchState::Running);

        assert_eq!(ctl.pause(&id).unwrap(), BatchState::Pausing);
        assert_eq!(ctl.pause(&id).unwrap(), BatchState::Pausing);
        // 暂停中恢复是空操作，批次仍会进入 Paused
        assert_eq!(ctl.resume(&id).unwrap(), BatchState::Pausing);

        gate.add_permits(1);
        eventually(|| ctl.snapshot(&id).unwrap().state == BatchState::Paused).await;
        assert_eq!(processor.seen().len(), 1);
        assert_eq!(ctl.pause(&id).unwrap(), BatchState::Paused);

        assert_eq!(ctl.resume(&id).unwrap(), BatchState::Running);
        gate.add_permits(10);
        let s = ctl.wait(&id).await.unwrap();
        assert_eq!(s.state, BatchState::Completed);

        assert!(matches!(
            ctl.pause(&id),
            Err(BatchError::InvalidState { .. })
        ));
        assert!(matches!(
            ctl.cancel(&id),
            Err(BatchError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let ctl = controller(Arc::new(ScriptedProcessor::default()));

        assert!(matches!(
            ctl.start(Vec::new(), ProcessingConfig::default(), Some(2)),
            Err(BatchError::InvalidArgument(_))
        ));
        assert!(matches!(
            ctl.start(work_items(2), ProcessingConfig::default(), Some(0)),
            Err(BatchError::InvalidArgument(_))
        ));
        assert!(matches!(
            ctl.start(work_items(2), ProcessingConfig::default(), Some(9)),
            Err(BatchError::InvalidArgument(_))
        ));

        let custom = ProcessingConfig {
            preset: Preset::Custom,
            ..Default::default()
        };
        assert!(matches!(
            ctl.start(work_items(2), custom, Some(2)),
            Err(BatchError::InvalidArgument(_))
        ));

        let mut dup = work_items(2);
        dup.push(WorkItem::new("k0", "/tmp/again.png"));
        assert!(matches!(
            ctl.start(dup, ProcessingConfig::default(), Some(2)),
            Err(BatchError::InvalidArgument(_))
        ));

        assert!(ctl.list().is_empty());
        assert!(matches!(ctl.pause("missing"), Err(BatchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unready_engine_rejected() {
        let ctl = controller(Arc::new(ScriptedProcessor {
            not_ready: true,
            ..Default::default()
        }));
        let config = ProcessingConfig {
            engine: Engine::RemoteApi,
            ..Default::default()
        };
        let err = ctl.start(work_items(1), config, None).unwrap_err();
        assert!(matches!(err, BatchError::InvalidArgument(ref m) if m.contains("缺少凭证")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_events_end_with_terminal_state() {
        let (processor, gate) = ScriptedProcessor::gated();
        let ctl = controller(processor.clone());

        let id = ctl
            .start(work_items(4), ProcessingConfig::default(), Some(2))
            .unwrap()
            .batch_id;
        let mut rx = ctl.subscribe(&id).unwrap();
        gate.add_permits(4);

        let mut finished = 0;
        let last = loop {
            let event = rx.recv().await.unwrap();
            assert_counts_consistent(&event.snapshot);
            if matches!(event.kind, ProgressEventKind::ItemFinished { .. }) {
                finished += 1;
            }
            if event.is_terminal() {
                break event;
            }
        };

        assert_eq!(finished, 4);
        assert!(matches!(
            last.kind,
            ProgressEventKind::StateChanged {
                to: BatchState::Completed,
                ..
            }
        ));
        assert_eq!(last.snapshot.finished_count, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slots_capped_by_item_count_and_remove() {
        let processor = Arc::new(ScriptedProcessor::default());
        let ctl = controller(processor);

        let id = ctl
            .start(work_items(2), ProcessingConfig::default(), Some(5))
            .unwrap()
            .batch_id;
        assert_eq!(ctl.get(&id).unwrap().slots.len(), 2);

        ctl.wait(&id).await.unwrap();
        assert_eq!(ctl.active_count(), 0);
        assert_eq!(ctl.list().len(), 1);

        ctl.remove(&id).unwrap();
        assert!(matches!(ctl.get(&id), Err(BatchError::NotFound(_))));
        assert_eq!(ctl.clear_finished(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_evict_finished_keeps_running_batches() {
        let (processor, gate) = ScriptedProcessor::gated();
        let ctl = controller(processor.clone());

        let done = ctl
            .start(work_items(1), ProcessingConfig::default(), None)
            .unwrap()
            .batch_id;
        gate.add_permits(1);
        ctl.wait(&done).await.unwrap();
        eventually(|| processor.running() == 0).await;

        let running = ctl
            .start(work_items(1), ProcessingConfig::default(), None)
            .unwrap()
            .batch_id;
        eventually(|| processor.running() == 1).await;

        assert_eq!(ctl.evict_finished(Duration::from_secs(3600)), 0);
        assert_eq!(ctl.list().len(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ctl.evict_finished(Duration::from_millis(10)), 1);
        assert!(matches!(ctl.get(&done), Err(BatchError::NotFound(_))));
        assert!(ctl.get(&running).is_ok());

        gate.add_permits(1);
        ctl.wait(&running).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_remove_running_batch_rejected() {
        let (processor, gate) = ScriptedProcessor::gated();
        let ctl = controller(processor.clone());

        let id = ctl
            .start(work_items(1), ProcessingConfig::default(), None)
            .unwrap()
            .batch_id;
        assert!(matches!(
            ctl.remove(&id),
            Err(BatchError::InvalidState { .. })
        ));

        gate.add_permits(1);
        ctl.wait(&id).await.unwrap();
        assert_eq!(ctl.clear_finished(), 1);
        assert!(ctl.list().is_empty());
    }
}
