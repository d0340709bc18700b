use crate::strategy::{FailureKind, ItemOutput, StrategyError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 条目状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// 等待中
    Pending,
    /// 处理中
    Active,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

/// 待处理的工作项
///
/// 从队列取出后所有权转移给持有它的槽位，处理结束前不会被其他槽位看到。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// 稳定键（上传后的文件名）
    pub key: String,
    /// 源文件路径
    pub source: PathBuf,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            source: source.into(),
        }
    }
}

/// 条目失败详情
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// 单个条目的处理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StrategyResult {
    Success(ItemOutput),
    Failure(ItemFailure),
}

impl StrategyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StrategyResult::Success(_))
    }
}

impl From<Result<ItemOutput, StrategyError>> for StrategyResult {
    fn from(result: Result<ItemOutput, StrategyError>) -> Self {
        match result {
            Ok(output) => StrategyResult::Success(output),
            Err(e) => StrategyResult::Failure(ItemFailure {
                kind: e.kind(),
                message: e.to_string(),
            }),
        }
    }
}

/// 批次中的条目记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    /// 条目键
    pub key: String,
    /// 源文件路径
    pub source: PathBuf,
    /// 当前状态
    pub status: ItemStatus,
    /// 处理该条目的槽位
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<usize>,
    /// 开始处理时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 结束时间 (Unix timestamp)
    pub finished_at: Option<i64>,
    /// 成功输出
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ItemOutput>,
    /// 失败详情
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemFailure>,
}

impl BatchItem {
    pub fn new(item: &WorkItem) -> Self {
        Self {
            key: item.key.clone(),
            source: item.source.clone(),
            status: ItemStatus::Pending,
            slot_id: None,
            started_at: None,
            finished_at: None,
            output: None,
            error: None,
        }
    }

    /// 标记为处理中
    pub fn mark_active(&mut self, slot_id: usize) {
        self.status = ItemStatus::Active;
        self.slot_id = Some(slot_id);
        self.started_at = Some(chrono::Utc::now().timestamp());
    }

    /// 记录处理结果
    pub fn mark_finished(&mut self, result: StrategyResult) {
        self.finished_at = Some(chrono::Utc::now().timestamp());
        match result {
            StrategyResult::Success(output) => {
                self.status = ItemStatus::Completed;
                self.output = Some(output);
            }
            StrategyResult::Failure(failure) => {
                self.status = ItemStatus::Failed;
                self.error = Some(failure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_lifecycle() {
        let work = WorkItem::new("a.png", "/tmp/a.png");
        let mut item = BatchItem::new(&work);
        assert_eq!(item.status, ItemStatus::Pending);

        item.mark_active(1);
        assert_eq!(item.status, ItemStatus::Active);
        assert_eq!(item.slot_id, Some(1));
        assert!(item.started_at.is_some());

        item.mark_finished(StrategyResult::Failure(ItemFailure {
            kind: FailureKind::Io,
            message: "磁盘已满".to_string(),
        }));
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.status.is_terminal());
        assert_eq!(item.error.as_ref().unwrap().kind, FailureKind::Io);
    }

    #[test]
    fn test_result_from_error() {
        let result: StrategyResult =
            Err(StrategyError::Unavailable("缺少凭证".to_string())).into();
        assert!(!result.is_success());
        match result {
            StrategyResult::Failure(f) => assert_eq!(f.kind, FailureKind::StrategyUnavailable),
            StrategyResult::Success(_) => panic!("expected failure"),
        }
    }
}
