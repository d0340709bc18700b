use image_upscaler_rust::{config::DEFAULT_CONFIG_PATH, server::build_router, AppConfig, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统（RUST_LOG 未设置时默认 info）
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    info!("Image Upscaler v{} 启动中...", env!("CARGO_PKG_VERSION"));

    // 加载配置
    let config_path =
        std::env::var("UPSCALER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = AppConfig::load_or_default(&config_path).await;
    config.apply_env_overrides();
    let addr = format!("{}:{}", config.server.host, config.server.port);

    // 创建应用状态
    let app_state = AppState::new(config)?;
    app_state.spawn_background_tasks();

    let app = build_router(app_state.clone());

    info!("服务器启动在: http://{}", addr);
    info!("API 基础路径: http://{}/api", addr);
    info!("健康检查: http://{}/api/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.shutdown();
    info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("监听退出信号失败: {}", e);
        std::future::pending::<()>().await;
    }
    info!("收到退出信号，正在关闭...");
}
