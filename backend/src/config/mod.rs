// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// Real-ESRGAN 模型版本
pub const DEFAULT_MODEL_VERSION: &str =
    "42fed1c4974146d4d2414e2be2c5277c7fcf05fcc3a73abf41610695738c1d7b";

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 文件存储配置
    pub storage: StorageConfig,
    /// 批量调度配置
    pub batch: BatchSettings,
    /// 远程放大 API 配置
    pub remote: RemoteApiConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// CORS允许的源
    pub cors_origins: Vec<String>,
}

/// 文件存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 上传文件目录
    pub upload_dir: PathBuf,
    /// 处理结果目录
    pub processed_dir: PathBuf,
    /// 单个上传文件大小上限 (MB)
    pub max_upload_size_mb: u64,
    /// 单次多文件上传的最大数量
    pub max_files_per_upload: usize,
    /// 清理任务执行间隔（秒）
    pub cleanup_interval_secs: u64,
    /// 文件最长保留时间（秒）
    pub max_file_age_secs: u64,
}

/// 批量调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// 单个批次允许的最大并发槽位数
    pub max_concurrency: usize,
    /// 请求未指定时的默认并发数
    pub default_concurrency: usize,
    /// 进度事件通道容量
    pub event_capacity: usize,
    /// 槽位持有同一条目超过该时长（秒）时输出警告
    pub stale_warning_secs: u64,
    /// 槽位巡检间隔（秒）
    pub stale_check_interval_secs: u64,
}

/// 远程放大 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteApiConfig {
    /// API 基础地址
    pub base_url: String,
    /// 模型版本
    pub model_version: String,
    /// 服务端 API Token（用户未提供时使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// 单次 HTTP 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 预测结果轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 等待预测完成的最长时间（秒）
    pub max_wait_secs: u64,
}

impl BatchSettings {
    /// 校验并发数，要求 1 <= concurrency <= max_concurrency
    pub fn validate_concurrency(&self, concurrency: usize) -> Result<(), String> {
        if concurrency < 1 {
            return Err("并发数必须至少为 1".to_string());
        }
        if concurrency > self.max_concurrency {
            return Err(format!(
                "并发数超过上限: {} > {}",
                concurrency, self.max_concurrency
            ));
        }
        Ok(())
    }

    pub fn stale_warning(&self) -> Duration {
        Duration::from_secs(self.stale_warning_secs)
    }

    pub fn stale_check_interval(&self) -> Duration {
        Duration::from_secs(self.stale_check_interval_secs.max(1))
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            default_concurrency: 2,
            event_capacity: 256,
            stale_warning_secs: 120,
            stale_check_interval_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            processed_dir: PathBuf::from("processed"),
            max_upload_size_mb: 10,
            max_files_per_upload: 10,
            cleanup_interval_secs: 3600,
            max_file_age_secs: 3600,
        }
    }
}

impl StorageConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_secs)
    }
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.replicate.com/v1".to_string(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            api_token: None,
            request_timeout_secs: 60,
            poll_interval_ms: 1000,
            max_wait_secs: 300,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ],
            },
            storage: StorageConfig::default(),
            batch: BatchSettings::default(),
            remote: RemoteApiConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                // 尝试保存默认配置
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }

    /// 应用环境变量覆盖（PORT、REPLICATE_API_TOKEN）
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("忽略非法的 PORT 环境变量: {}", port),
            }
        }

        if let Ok(token) = std::env::var("REPLICATE_API_TOKEN") {
            if !token.trim().is_empty() {
                self.remote.api_token = Some(token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.batch.max_concurrency, 8);
        assert_eq!(config.storage.max_files_per_upload, 10);
        assert!(config.remote.api_token.is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.batch.default_concurrency = 4;
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.server.port, config.server.port);
        assert_eq!(loaded.batch.default_concurrency, 4);
        assert_eq!(loaded.remote.model_version, DEFAULT_MODEL_VERSION);
    }

    #[tokio::test]
    async fn test_load_or_default_writes_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("app.toml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path).await;
        assert_eq!(config.server.port, 5000);
        assert!(std::path::Path::new(path).exists());
    }

    #[test]
    fn test_concurrency_validation() {
        let settings = BatchSettings::default();
        assert!(settings.validate_concurrency(0).is_err());
        assert!(settings.validate_concurrency(1).is_ok());
        assert!(settings.validate_concurrency(8).is_ok());
        assert!(settings.validate_concurrency(9).is_err());
    }
}
