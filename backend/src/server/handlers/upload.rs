// 上传API处理器

use crate::server::handlers::ApiResponse;
use crate::server::{ApiError, ApiResult, AppState};
use crate::storage::StoredFile;
use axum::{
    extract::{Multipart, State},
    Json,
};
use tracing::info;

/// 单文件上传
///
/// POST /api/upload (multipart, 字段名 image)
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ApiResponse<StoredFile>>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;

        let stored = state.file_store.save_upload(&name, &bytes).await?;
        info!("上传文件: {} -> {} ({} 字节)", name, stored.filename, stored.size);
        return Ok(Json(ApiResponse::success_with_message(stored, "上传成功")));
    }

    Err(ApiError::BadRequest("未上传文件".to_string()))
}

/// 多文件上传
///
/// POST /api/upload-multiple (multipart, 字段名 images)
pub async fn upload_multiple(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ApiResponse<Vec<StoredFile>>>> {
    let limit = state.config.storage.max_files_per_upload;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("images") {
            continue;
        }
        if files.len() >= limit {
            return Err(ApiError::BadRequest(format!(
                "单次最多上传 {} 个文件",
                limit
            )));
        }

        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        files.push(state.file_store.save_upload(&name, &bytes).await?);
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("未上传文件".to_string()));
    }

    info!("批量上传 {} 个文件", files.len());
    Ok(Json(ApiResponse::success_with_message(files, "上传成功")))
}
