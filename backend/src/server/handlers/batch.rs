// 批次API处理器

use crate::batch::{BatchDetail, BatchHandle, BatchItem, BatchState, ProgressSnapshot, WorkItem};
use crate::server::handlers::ApiResponse;
use crate::server::websocket::{stream_events, EventThrottler};
use crate::server::{ApiError, ApiResult, AppState};
use crate::storage::StorageError;
use crate::strategy::ProcessingConfig;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 创建批次请求
#[derive(Debug, Deserialize)]
pub struct StartBatchRequest {
    /// 已上传的文件名
    pub filenames: Vec<String>,
    /// 并发槽位数（不填使用默认值）
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(flatten)]
    pub config: ProcessingConfig,
}

/// 创建批次响应
#[derive(Debug, Serialize)]
pub struct StartBatchResponse {
    #[serde(flatten)]
    pub handle: BatchHandle,
    /// 不存在而被跳过的文件
    pub skipped: Vec<String>,
    pub snapshot: ProgressSnapshot,
}

/// 校验文件名并生成条目，不存在的文件被跳过
fn collect_items(
    state: &AppState,
    filenames: Vec<String>,
) -> ApiResult<(Vec<WorkItem>, Vec<String>)> {
    if filenames.is_empty() {
        return Err(ApiError::BadRequest("文件列表不能为空".to_string()));
    }

    let mut items = Vec::with_capacity(filenames.len());
    let mut skipped = Vec::new();
    for name in filenames {
        match state.file_store.upload_path(&name) {
            Ok(path) => items.push(WorkItem::new(name, path)),
            Err(StorageError::NotFound(_)) => {
                warn!("创建批次时跳过不存在的文件: {}", name);
                skipped.push(name);
            }
            Err(e) => return Err(e.into()),
        }
    }
    if items.is_empty() {
        return Err(ApiError::NotFound("没有有效的文件".to_string()));
    }
    Ok((items, skipped))
}

/// 创建并启动批次
///
/// POST /api/batches
pub async fn start_batch(
    State(state): State<AppState>,
    Json(req): Json<StartBatchRequest>,
) -> ApiResult<Json<ApiResponse<StartBatchResponse>>> {
    let (items, skipped) = collect_items(&state, req.filenames)?;

    let handle = state
        .controller
        .start(items, req.config, req.concurrency)?;
    let snapshot = state.controller.snapshot(&handle.batch_id)?;

    info!(
        "API: 创建批次 {} (条目数={}, 并发={}, 跳过={})",
        handle.batch_id,
        handle.total,
        handle.concurrency,
        skipped.len()
    );

    Ok(Json(ApiResponse::success(StartBatchResponse {
        handle,
        skipped,
        snapshot,
    })))
}

/// 同步批量放大结果
#[derive(Debug, Serialize)]
pub struct BatchUpscaleResponse {
    pub batch_id: String,
    /// 按提交顺序的条目记录
    pub results: Vec<BatchItem>,
    pub total_processed: usize,
    pub total_failed: usize,
    pub skipped: Vec<String>,
}

/// 批量放大并等待结束
///
/// POST /api/batch-upscale
///
/// 与 `/api/batches` 走同一个调度器，区别只是请求在批次结束后才返回。
pub async fn batch_upscale(
    State(state): State<AppState>,
    Json(req): Json<StartBatchRequest>,
) -> ApiResult<Json<ApiResponse<BatchUpscaleResponse>>> {
    let (items, skipped) = collect_items(&state, req.filenames)?;

    let handle = state
        .controller
        .start(items, req.config, req.concurrency)?;
    let snapshot = state.controller.wait(&handle.batch_id).await?;
    let detail = state.controller.get(&handle.batch_id)?;

    info!(
        "API: 批量放大完成 {} (成功={}, 失败={})",
        handle.batch_id, snapshot.finished_count, snapshot.errored_count
    );

    Ok(Json(ApiResponse::success_with_message(
        BatchUpscaleResponse {
            batch_id: handle.batch_id,
            results: detail.items,
            total_processed: snapshot.finished_count,
            total_failed: snapshot.errored_count,
            skipped,
        },
        "批量放大完成",
    )))
}

/// GET /api/batches
pub async fn list_batches(State(state): State<AppState>) -> Json<ApiResponse<Vec<ProgressSnapshot>>> {
    Json(ApiResponse::success(state.controller.list()))
}

/// GET /api/batches/:id
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<ApiResponse<BatchDetail>>> {
    Ok(Json(ApiResponse::success(state.controller.get(&batch_id)?)))
}

/// 状态变更响应
#[derive(Debug, Serialize)]
pub struct BatchStateResponse {
    pub batch_id: String,
    pub state: BatchState,
}

/// POST /api/batches/:id/pause
pub async fn pause_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<ApiResponse<BatchStateResponse>>> {
    let new_state = state.controller.pause(&batch_id)?;
    info!("API: 暂停批次 {} -> {}", batch_id, new_state);
    Ok(Json(ApiResponse::success(BatchStateResponse {
        batch_id,
        state: new_state,
    })))
}

/// POST /api/batches/:id/resume
pub async fn resume_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<ApiResponse<BatchStateResponse>>> {
    let new_state = state.controller.resume(&batch_id)?;
    info!("API: 恢复批次 {} -> {}", batch_id, new_state);
    Ok(Json(ApiResponse::success(BatchStateResponse {
        batch_id,
        state: new_state,
    })))
}

/// 取消响应
#[derive(Debug, Serialize)]
pub struct CancelBatchResponse {
    pub batch_id: String,
    pub state: BatchState,
    /// 未开始处理、被回收的条目
    pub drained: Vec<String>,
}

/// POST /api/batches/:id/cancel
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<ApiResponse<CancelBatchResponse>>> {
    let drained = state.controller.cancel(&batch_id)?;
    let snapshot = state.controller.snapshot(&batch_id)?;
    info!("API: 取消批次 {}，回收 {} 个条目", batch_id, drained.len());

    Ok(Json(ApiResponse::success(CancelBatchResponse {
        batch_id,
        state: snapshot.state,
        drained: drained.into_iter().map(|item| item.key).collect(),
    })))
}

/// DELETE /api/batches/:id
pub async fn delete_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state.controller.remove(&batch_id)?;
    Ok(Json(ApiResponse::ok("批次已删除")))
}

/// DELETE /api/batches/clear/finished
pub async fn clear_finished_batches(State(state): State<AppState>) -> Json<ApiResponse<usize>> {
    Json(ApiResponse::success(state.controller.clear_finished()))
}

/// 事件订阅参数
#[derive(Debug, Deserialize)]
pub struct EventStreamQuery {
    /// 条目级事件的最小推送间隔（毫秒），0 表示不节流
    #[serde(default)]
    pub throttle_ms: u64,
}

/// 进度事件推送
///
/// GET /api/batches/:id/events (WebSocket)
pub async fn batch_events(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Query(query): Query<EventStreamQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    // 先订阅再取快照，两者之间发生的事件不会丢失
    let rx = state.controller.subscribe(&batch_id)?;
    let snapshot = state.controller.snapshot(&batch_id)?;
    let throttler = EventThrottler::with_millis(query.throttle_ms);

    info!("API: 订阅批次 {} 的进度事件", batch_id);
    Ok(ws.on_upgrade(move |socket| stream_events(socket, snapshot, rx, throttler)))
}
