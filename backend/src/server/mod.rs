// Web服务器模块

pub mod error;
pub mod handlers;
pub mod state;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::warn;

/// 构建完整路由
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let api_routes = Router::new()
        // 上传
        .route("/upload", post(handlers::upload_image))
        .route("/upload-multiple", post(handlers::upload_multiple))
        // 单图放大
        .route("/upscale", post(handlers::upscale_image))
        .route("/batch-upscale", post(handlers::batch_upscale))
        // 批次
        .route(
            "/batches",
            post(handlers::start_batch).get(handlers::list_batches),
        )
        .route(
            "/batches/clear/finished",
            delete(handlers::clear_finished_batches),
        )
        .route(
            "/batches/:id",
            get(handlers::get_batch).delete(handlers::delete_batch),
        )
        .route("/batches/:id/pause", post(handlers::pause_batch))
        .route("/batches/:id/resume", post(handlers::resume_batch))
        .route("/batches/:id/cancel", post(handlers::cancel_batch))
        .route("/batches/:id/events", get(handlers::batch_events))
        // 下载与文件信息
        .route("/download/:filename", get(handlers::download_image))
        .route("/download-batch/:batch_id", post(handlers::download_batch))
        .route("/file-info/:filename", get(handlers::get_file_info))
        .route("/health", get(handlers::health))
        .with_state(state);

    // 多文件上传的请求体上限
    let body_limit = (config.storage.max_upload_size_mb as usize)
        .saturating_mul(config.storage.max_files_per_upload.max(1))
        .saturating_mul(1024 * 1024);

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors_origins));

    Router::new()
        .nest("/api", api_routes)
        .nest_service("/uploads", ServeDir::new(&config.storage.upload_dir))
        .nest_service("/processed", ServeDir::new(&config.storage.processed_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware)
}

/// 按配置的源构建 CORS；未配置或包含 "*" 时放开全部源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("忽略无效的 CORS 源: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}
