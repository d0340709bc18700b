// Image Upscaler Rust Library
// 图片批量放大服务核心库

// 配置管理模块
pub mod config;

// 批量调度模块
pub mod batch;

// 处理策略模块
pub mod strategy;

// 文件存储模块
pub mod storage;

// 结果打包
pub mod archive;

// Web服务器模块
pub mod server;

// 导出常用类型
pub use batch::{
    BatchController, BatchError, BatchState, ProgressEvent, ProgressSnapshot, WorkItem,
};
pub use config::AppConfig;
pub use server::AppState;
pub use storage::FileStore;
pub use strategy::{ItemProcessor, ProcessingConfig, StrategyDispatcher};
