//! 处理策略模块
//!
//! 把处理配置映射到具体的单条目处理函数：
//! - `resize`：插值核缩放
//! - `remote-api`：远程超分 API
//! - `local-compute`：本地双线性放大 + 锐化
//!
//! 调度器只通过 [`ItemProcessor`] 使用本模块，把每次调用视为可能很慢、可能失败的黑盒。

pub mod dimensions;
pub mod error;
pub mod local;
pub mod remote;
pub mod resize;

pub use dimensions::{Dimensions, Preset};
pub use error::{FailureKind, StrategyError};
pub use local::LocalEnhancer;
pub use remote::RemoteUpscaler;
pub use resize::ResizeStrategy;

use crate::batch::WorkItem;
use crate::config::RemoteApiConfig;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 处理引擎
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Engine {
    #[default]
    Resize,
    RemoteApi,
    LocalCompute,
}

/// 插值核
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Kernel {
    Nearest,
    Bilinear,
    Bicubic,
    #[default]
    Lanczos,
}

impl From<String> for Kernel {
    fn from(name: String) -> Self {
        Kernel::from_name(&name)
    }
}

impl Kernel {
    /// 未知名称按 lanczos 处理
    pub fn from_name(name: &str) -> Self {
        match name {
            "nearest" => Kernel::Nearest,
            "bilinear" => Kernel::Bilinear,
            "bicubic" => Kernel::Bicubic,
            _ => Kernel::Lanczos,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kernel::Nearest => "nearest",
            Kernel::Bilinear => "bilinear",
            Kernel::Bicubic => "bicubic",
            Kernel::Lanczos => "lanczos",
        }
    }

    pub fn filter(&self) -> FilterType {
        match self {
            Kernel::Nearest => FilterType::Nearest,
            Kernel::Bilinear => FilterType::Triangle,
            Kernel::Bicubic => FilterType::CatmullRom,
            Kernel::Lanczos => FilterType::Lanczos3,
        }
    }
}

/// 处理配置（批次内不可变）
///
/// 同时接受 snake_case 与前端的 camelCase 字段：
/// `customWidth`/`customHeight` 可以是数字或字符串（空串视为未填），
/// 未指定 `engine` 时 `useAI: true` 选择远程引擎。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ProcessingConfigInput")]
pub struct ProcessingConfig {
    /// 处理引擎
    pub engine: Engine,
    /// 尺寸预设
    pub preset: Preset,
    /// 自定义宽度（preset = custom 时必填）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_width: Option<u32>,
    /// 自定义高度（preset = custom 时必填）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_height: Option<u32>,
    /// 插值核
    pub kernel: Kernel,
    /// 用户提供的远程 API 凭证
    #[serde(skip_serializing)]
    pub credentials: Option<String>,
}

/// 请求中的处理配置
#[derive(Debug, Deserialize)]
struct ProcessingConfigInput {
    #[serde(default)]
    engine: Option<Engine>,
    #[serde(default)]
    preset: Preset,
    #[serde(default, alias = "customWidth", deserialize_with = "lenient_dimension")]
    custom_width: Option<u32>,
    #[serde(default, alias = "customHeight", deserialize_with = "lenient_dimension")]
    custom_height: Option<u32>,
    #[serde(default, alias = "method")]
    kernel: Kernel,
    #[serde(default, alias = "userApiKey")]
    credentials: Option<String>,
    #[serde(default, alias = "useAI")]
    use_ai: bool,
}

impl From<ProcessingConfigInput> for ProcessingConfig {
    fn from(input: ProcessingConfigInput) -> Self {
        let engine = input.engine.unwrap_or(if input.use_ai {
            Engine::RemoteApi
        } else {
            Engine::Resize
        });

        Self {
            engine,
            preset: input.preset,
            custom_width: input.custom_width,
            custom_height: input.custom_height,
            kernel: input.kernel,
            credentials: input.credentials.filter(|c| !c.trim().is_empty()),
        }
    }
}

/// 尺寸字段：数字、数字字符串或空串
fn lenient_dimension<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("无效的尺寸: {}", text)))
        }
    }
}

impl ProcessingConfig {
    /// 自定义尺寸（宽高均有效时）
    pub fn custom_dimensions(&self) -> Option<Dimensions> {
        match (self.custom_width, self.custom_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(Dimensions::new(w, h)),
            _ => None,
        }
    }

    /// 校验配置：custom 预设需要正数宽高
    pub fn validate(&self) -> Result<(), String> {
        if self.preset == Preset::Custom && self.custom_dimensions().is_none() {
            return Err("自定义预设需要提供有效的宽度和高度".to_string());
        }
        Ok(())
    }

    /// 计算目标尺寸
    pub fn target_dimensions(&self, original: Dimensions) -> Dimensions {
        self.preset.resolve(original, self.custom_dimensions())
    }
}

/// 单条目处理输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutput {
    /// 输出文件名
    pub filename: String,
    /// 输出路径
    pub path: PathBuf,
    pub original_dimensions: Dimensions,
    pub upscaled_dimensions: Dimensions,
    /// 原文件大小（字节）
    pub original_size: u64,
    /// 输出文件大小（字节）
    pub upscaled_size: u64,
    /// 输出格式
    pub format: String,
    /// 处理方式描述
    pub method: String,
}

/// 单条目处理契约
///
/// 实现不得修改调度器的共享状态；超时、重试等策略由实现自行负责。
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// 处理单个条目
    async fn process(
        &self,
        item: &WorkItem,
        config: &ProcessingConfig,
    ) -> Result<ItemOutput, StrategyError>;

    /// 启动批次前检查该配置是否可用
    fn check_ready(&self, _config: &ProcessingConfig) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// 策略分发器
#[derive(Debug)]
pub struct StrategyDispatcher {
    resize: ResizeStrategy,
    remote: RemoteUpscaler,
    local: LocalEnhancer,
}

impl StrategyDispatcher {
    pub fn new(processed_dir: PathBuf, remote_config: RemoteApiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            resize: ResizeStrategy::new(processed_dir.clone()),
            remote: RemoteUpscaler::new(processed_dir.clone(), remote_config)?,
            local: LocalEnhancer::new(processed_dir),
        })
    }

    /// 远程引擎是否可用
    pub fn remote_available(&self, user_token: Option<&str>) -> bool {
        self.remote.resolve_token(user_token).is_some()
    }
}

#[async_trait]
impl ItemProcessor for StrategyDispatcher {
    async fn process(
        &self,
        item: &WorkItem,
        config: &ProcessingConfig,
    ) -> Result<ItemOutput, StrategyError> {
        match config.engine {
            Engine::Resize => self.resize.process(item, config).await,
            Engine::RemoteApi => self.remote.process(item, config).await,
            Engine::LocalCompute => self.local.process(item, config).await,
        }
    }

    fn check_ready(&self, config: &ProcessingConfig) -> Result<(), StrategyError> {
        match config.engine {
            Engine::RemoteApi if !self.remote_available(config.credentials.as_deref()) => {
                Err(StrategyError::Unavailable(
                    "远程放大需要 API Key，请提供 Replicate API Key 或在服务端配置".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// 在阻塞线程池中执行图片计算
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, StrategyError>
where
    F: FnOnce() -> Result<T, StrategyError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StrategyError::Internal(format!("处理线程异常退出: {}", e)))?
}

/// 生成输出文件路径
pub(crate) fn output_path(dir: &Path, prefix: &str, ext: &str) -> (String, PathBuf) {
    let filename = format!("{}-{}.{}", prefix, Uuid::new_v4(), ext);
    let path = dir.join(&filename);
    (filename, path)
}

/// 本地图片变换的公共流程：读取 -> 计算目标尺寸 -> 变换 -> 写出
pub(crate) fn transform_file<F>(
    source: &Path,
    processed_dir: &Path,
    prefix: &str,
    output_format: Option<ImageFormat>,
    config: &ProcessingConfig,
    method: String,
    transform: F,
) -> Result<ItemOutput, StrategyError>
where
    F: FnOnce(DynamicImage, Dimensions) -> DynamicImage,
{
    if !source.exists() {
        return Err(StrategyError::InvalidInput(format!(
            "源文件不存在: {}",
            source.display()
        )));
    }

    let original_size = std::fs::metadata(source)?.len();
    let format = match output_format {
        Some(format) => format,
        None => ImageFormat::from_path(source).unwrap_or(ImageFormat::Png),
    };

    let img = image::open(source)?;
    let (width, height) = img.dimensions();
    let original = Dimensions::new(width, height);
    let target = config.target_dimensions(original);
    if target.width == 0 || target.height == 0 {
        return Err(StrategyError::InvalidInput(format!(
            "目标尺寸无效: {}x{}",
            target.width, target.height
        )));
    }

    let output = transform(img, target);

    std::fs::create_dir_all(processed_dir)?;
    let ext = format.extensions_str().first().copied().unwrap_or("png");
    let (filename, path) = output_path(processed_dir, prefix, ext);
    output.save_with_format(&path, format)?;

    let upscaled_size = std::fs::metadata(&path)?.len();
    let (out_w, out_h) = output.dimensions();

    Ok(ItemOutput {
        filename,
        path,
        original_dimensions: original,
        upscaled_dimensions: Dimensions::new(out_w, out_h),
        original_size,
        upscaled_size,
        format: ext.to_string(),
        method,
    })
}
