// 文件API处理器：单图放大、下载、打包下载、文件信息

use crate::archive;
use crate::batch::WorkItem;
use crate::server::handlers::ApiResponse;
use crate::server::{ApiError, ApiResult, AppState};
use crate::storage::{FileInfo, StorageError};
use crate::strategy::{ItemOutput, ItemProcessor, ProcessingConfig};
use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 单图放大请求
#[derive(Debug, Deserialize)]
pub struct UpscaleRequest {
    pub filename: String,
    #[serde(flatten)]
    pub config: ProcessingConfig,
}

/// 单图放大（同步等待结果）
///
/// POST /api/upscale
pub async fn upscale_image(
    State(state): State<AppState>,
    Json(req): Json<UpscaleRequest>,
) -> ApiResult<Json<ApiResponse<ItemOutput>>> {
    req.config.validate().map_err(ApiError::BadRequest)?;

    let source = state.file_store.upload_path(&req.filename)?;
    state.dispatcher.check_ready(&req.config)?;

    info!(
        "API: 单图放大 {} (engine={:?}, preset={})",
        req.filename,
        req.config.engine,
        req.config.preset.as_str()
    );

    let item = WorkItem::new(req.filename, source);
    let output = state.dispatcher.process(&item, &req.config).await?;
    Ok(Json(ApiResponse::success_with_message(output, "放大完成")))
}

/// 下载处理结果
///
/// GET /api/download/:filename
pub async fn download_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let path = state.file_store.processed_path(&filename)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    let content_type = mime_guess::from_path(&path).first_or_octet_stream();

    Ok((
        [
            (header::CONTENT_TYPE, content_type.essence_str().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// 打包下载请求
#[derive(Debug, Default, Deserialize)]
pub struct DownloadBatchRequest {
    /// 要打包的文件；为空时使用该批次所有成功条目的输出
    #[serde(default)]
    pub filenames: Option<Vec<String>>,
}

/// 打包下载
///
/// POST /api/download-batch/:batch_id
pub async fn download_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    body: Option<Json<DownloadBatchRequest>>,
) -> ApiResult<Response> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let filenames = match req.filenames {
        Some(names) if !names.is_empty() => names,
        Some(_) => return Err(ApiError::BadRequest("文件列表不能为空".to_string())),
        None => state
            .controller
            .get(&batch_id)?
            .items
            .into_iter()
            .filter_map(|item| item.output.map(|o| o.filename))
            .collect(),
    };

    let mut files = Vec::with_capacity(filenames.len());
    for name in filenames {
        match state.file_store.processed_path(&name) {
            Ok(path) => files.push((name, path)),
            Err(StorageError::NotFound(_)) => warn!("打包时跳过不存在的文件: {}", name),
            Err(e) => return Err(e.into()),
        }
    }
    if files.is_empty() {
        return Err(ApiError::NotFound("没有可打包的文件".to_string()));
    }

    let (bytes, written) = archive::build_zip(files).await?;
    info!("API: 打包下载 batch={}, 文件数={}", batch_id, written);

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"batch-{}.zip\"", batch_id),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// 上传文件信息
///
/// GET /api/file-info/:filename
pub async fn get_file_info(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<ApiResponse<FileInfo>>> {
    let info = state.file_store.file_info(&filename).await?;
    Ok(Json(ApiResponse::success(info)))
}

/// 健康检查响应
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: String,
    pub active_batches: usize,
    pub remote_available: bool,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
        active_batches: state.controller.active_count(),
        remote_available: state.dispatcher.remote_available(None),
    })
}
