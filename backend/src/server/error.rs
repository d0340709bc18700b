// 统一错误处理

use crate::batch::BatchError;
use crate::storage::StorageError;
use crate::strategy::StrategyError;
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 内部服务器错误
    Internal(anyhow::Error),
    /// 未找到
    NotFound(String),
    /// 请求参数错误
    BadRequest(String),
    /// 当前状态不允许该操作
    Conflict(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Internal(e) => write!(f, "内部错误: {}", e),
            ApiError::NotFound(msg) => write!(f, "未找到: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "请求无效: {}", msg),
            ApiError::Conflict(msg) => write!(f, "状态冲突: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

/// 错误响应体
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match self {
            ApiError::Internal(e) => {
                tracing::error!("内部错误: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "服务器内部错误".to_string(),
                    Some(e.to_string()),
                )
            }
            ApiError::NotFound(msg) => {
                tracing::debug!("未找到: {}", msg);
                (StatusCode::NOT_FOUND, msg, None)
            }
            ApiError::BadRequest(msg) => {
                tracing::debug!("请求无效: {}", msg);
                (StatusCode::BAD_REQUEST, msg, None)
            }
            ApiError::Conflict(msg) => {
                tracing::debug!("状态冲突: {}", msg);
                (StatusCode::CONFLICT, msg, None)
            }
        };

        let body = Json(ErrorResponse {
            code: status.as_u16() as i32,
            message,
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::InvalidArgument(_) => ApiError::BadRequest(err.to_string()),
            BatchError::NotFound(_) => ApiError::NotFound(err.to_string()),
            BatchError::InvalidState { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StorageError::Io(e) => ApiError::Internal(e.into()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<StrategyError> for ApiError {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::InvalidInput(_) | StrategyError::Unavailable(_) => {
                ApiError::BadRequest(err.to_string())
            }
            _ => ApiError::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("上传数据解析失败: {}", err))
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
