//! 批次错误
//!
//! 只有配置层面的问题会同步返回给调用方；
//! 单个条目的失败由槽位就地记录，不会出现在这里。

use super::state::BatchState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    /// 批次参数无效（空批次、并发数越界、配置不可用等）
    #[error("参数无效: {0}")]
    InvalidArgument(String),

    /// 批次不存在
    #[error("批次不存在: {0}")]
    NotFound(String),

    /// 当前状态不允许该操作
    #[error("批次 {batch_id} 处于 {state} 状态，无法{action}")]
    InvalidState {
        batch_id: String,
        state: BatchState,
        action: &'static str,
    },
}

pub type BatchResult<T> = Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BatchError::InvalidState {
            batch_id: "b1".to_string(),
            state: BatchState::Completed,
            action: "暂停",
        };
        assert_eq!(err.to_string(), "批次 b1 处于 completed 状态，无法暂停");
        assert_eq!(
            BatchError::InvalidArgument("批次为空".into()).to_string(),
            "参数无效: 批次为空"
        );
    }
}
