//! 批量调度模块
//!
//! 有界并发地处理一批图片：固定数量的槽位从共享队列取条目，
//! 单个条目失败只记录在该条目上，批次支持暂停、恢复与取消。

pub mod controller;
pub mod error;
pub mod events;
pub mod item;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod slot_pool;
pub mod state;

pub use controller::{BatchController, BatchDetail, BatchHandle};
pub use error::{BatchError, BatchResult};
pub use events::{EventSink, ProgressEvent, ProgressEventKind};
pub use item::{BatchItem, ItemFailure, ItemStatus, StrategyResult, WorkItem};
pub use progress::{ProgressAggregator, ProgressSnapshot};
pub use queue::WorkQueue;
pub use scheduler::BatchRun;
pub use slot_pool::{SlotPool, SlotStatus};
pub use state::BatchState;
