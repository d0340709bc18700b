//! 插值核缩放

use super::{run_blocking, transform_file, ItemOutput, ProcessingConfig, StrategyError};
use crate::batch::WorkItem;
use std::path::PathBuf;
use tracing::debug;

/// 插值缩放策略
#[derive(Debug, Clone)]
pub struct ResizeStrategy {
    processed_dir: PathBuf,
}

impl ResizeStrategy {
    pub fn new(processed_dir: PathBuf) -> Self {
        Self { processed_dir }
    }

    /// 按配置的插值核缩放到目标尺寸，保持原格式
    pub async fn process(
        &self,
        item: &WorkItem,
        config: &ProcessingConfig,
    ) -> Result<ItemOutput, StrategyError> {
        let source = item.source.clone();
        let processed_dir = self.processed_dir.clone();
        let config = config.clone();
        let kernel = config.kernel;

        debug!("缩放处理: key={}, kernel={}", item.key, kernel.as_str());

        run_blocking(move || {
            transform_file(
                &source,
                &processed_dir,
                "upscaled",
                None,
                &config,
                format!("Resize ({})", kernel.as_str()),
                |img, target| img.resize_exact(target.width, target.height, kernel.filter()),
            )
        })
        .await
    }
}
