// 应用状态

use crate::batch::BatchController;
use crate::config::AppConfig;
use crate::storage::FileStore;
use crate::strategy::StrategyDispatcher;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 配置（启动后只读）
    pub config: Arc<AppConfig>,
    /// 文件存储
    pub file_store: Arc<FileStore>,
    /// 处理策略（单图处理直接调用，批次经控制器调用）
    pub dispatcher: Arc<StrategyDispatcher>,
    /// 批次控制器
    pub controller: Arc<BatchController>,
    /// 服务关闭信号
    pub shutdown: CancellationToken,
}

impl AppState {
    /// 创建应用状态
    pub fn new(config: AppConfig) -> Result<Self> {
        let file_store = Arc::new(FileStore::new(&config.storage)?);
        let dispatcher = Arc::new(StrategyDispatcher::new(
            config.storage.processed_dir.clone(),
            config.remote.clone(),
        )?);
        let controller = Arc::new(BatchController::new(
            dispatcher.clone(),
            config.batch.clone(),
        ));

        info!(
            "应用状态初始化完成: 上传目录={:?}, 输出目录={:?}, 远程放大={}",
            file_store.upload_dir(),
            file_store.processed_dir(),
            if dispatcher.remote_available(None) {
                "已配置"
            } else {
                "未配置"
            }
        );

        Ok(Self {
            config: Arc::new(config),
            file_store,
            dispatcher,
            controller,
            shutdown: CancellationToken::new(),
        })
    }

    /// 启动后台任务（文件清理、过期批次清理）
    ///
    /// 批次与其输出文件使用同一个保留时长。
    pub fn spawn_background_tasks(&self) {
        let storage = &self.config.storage;
        self.file_store.start_cleanup_task(
            storage.cleanup_interval(),
            storage.max_file_age(),
            self.shutdown.child_token(),
        );
        self.controller.start_eviction_task(
            storage.cleanup_interval(),
            storage.max_file_age(),
            self.shutdown.child_token(),
        );
    }

    /// 关闭：停止后台任务并取消未结束的批次
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.controller.shutdown();
        info!("应用状态已关闭");
    }
}
