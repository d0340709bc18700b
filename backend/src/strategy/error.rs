//! 处理策略错误
//!
//! 单个条目的处理失败统一归类为 [`StrategyError`]，
//! 调度器只关心 [`FailureKind`] 和错误消息，不会向上抛出。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 策略执行错误
#[derive(Debug, Error)]
pub enum StrategyError {
    /// 输入无效（源文件缺失、尺寸非法等）
    #[error("输入无效: {0}")]
    InvalidInput(String),

    /// 策略不可用（例如远程 API 缺少凭证或凭证无效）
    #[error("处理引擎不可用: {0}")]
    Unavailable(String),

    /// 文件读写错误
    #[error("文件读写错误: {0}")]
    Io(#[from] std::io::Error),

    /// 图片编解码错误
    #[error("图片处理错误: {0}")]
    Image(#[from] image::ImageError),

    /// 远程服务返回错误
    #[error("远程服务错误: {0}")]
    Remote(String),

    /// 超时（由策略自身的时限触发）
    #[error("处理超时: {0}")]
    Timeout(String),

    /// 执行线程异常
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 输入问题
    InvalidInput,
    /// 引擎不可用
    StrategyUnavailable,
    /// IO 问题
    Io,
    /// 编解码/计算问题
    Processing,
    /// 远程服务问题
    Remote,
    /// 超时
    Timeout,
    /// 任务执行异常（panic 等）
    Internal,
}

impl StrategyError {
    /// 获取失败分类
    pub fn kind(&self) -> FailureKind {
        match self {
            StrategyError::InvalidInput(_) => FailureKind::InvalidInput,
            StrategyError::Unavailable(_) => FailureKind::StrategyUnavailable,
            StrategyError::Io(_) => FailureKind::Io,
            StrategyError::Image(_) => FailureKind::Processing,
            StrategyError::Remote(_) => FailureKind::Remote,
            StrategyError::Timeout(_) => FailureKind::Timeout,
            StrategyError::Internal(_) => FailureKind::Internal,
        }
    }
}

impl From<reqwest::Error> for StrategyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return StrategyError::Timeout(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                StrategyError::Unavailable(format!("API 凭证无效: {}", status))
            }
            Some(status) if status.as_u16() == 429 => {
                StrategyError::Remote("API 配额已用尽或请求过于频繁".to_string())
            }
            _ => StrategyError::Remote(err.to_string()),
        }
    }
}
