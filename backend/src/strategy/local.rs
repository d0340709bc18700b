//! 本地计算增强：双线性放大后做一次反锐化掩模

use super::{run_blocking, transform_file, ItemOutput, ProcessingConfig, StrategyError};
use crate::batch::WorkItem;
use image::imageops::FilterType;
use image::ImageFormat;
use std::path::PathBuf;

/// 锐化半径
const SHARPEN_SIGMA: f32 = 1.0;
/// 锐化阈值
const SHARPEN_THRESHOLD: i32 = 2;

/// 本地增强策略
#[derive(Debug, Clone)]
pub struct LocalEnhancer {
    processed_dir: PathBuf,
}

impl LocalEnhancer {
    pub fn new(processed_dir: PathBuf) -> Self {
        Self { processed_dir }
    }

    pub async fn process(
        &self,
        item: &WorkItem,
        config: &ProcessingConfig,
    ) -> Result<ItemOutput, StrategyError> {
        let source = item.source.clone();
        let processed_dir = self.processed_dir.clone();
        let config = config.clone();

        run_blocking(move || {
            transform_file(
                &source,
                &processed_dir,
                "upscaled-local",
                Some(ImageFormat::Png),
                &config,
                "Local Enhance (bilinear + sharpen)".to_string(),
                |img, target| {
                    img.resize_exact(target.width, target.height, FilterType::Triangle)
                        .unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD)
                },
            )
        })
        .await
    }
}
