//! 远程超分 API（Replicate Real-ESRGAN）
//!
//! 流程：读取源图 -> base64 data URI -> 创建预测 -> 轮询直到结束 -> 下载输出。
//! 单次请求超时和整体等待时长都由本策略自己控制，调度器不设时限。

use super::{
    output_path, run_blocking, Dimensions, ItemOutput, Preset, ProcessingConfig, StrategyError,
};
use crate::batch::WorkItem;
use crate::config::RemoteApiConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::ImageFormat;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 预测响应
#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

/// 远程放大策略
#[derive(Debug, Clone)]
pub struct RemoteUpscaler {
    client: Client,
    config: RemoteApiConfig,
    processed_dir: PathBuf,
}

impl RemoteUpscaler {
    pub fn new(processed_dir: PathBuf, config: RemoteApiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            processed_dir,
        })
    }

    /// 选择使用的 Token：用户提供的优先，其次是服务端配置
    pub fn resolve_token(&self, user_token: Option<&str>) -> Option<String> {
        user_token
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.trim().to_string())
            .or_else(|| {
                self.config
                    .api_token
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .map(|t| t.trim().to_string())
            })
    }

    /// 2x 预设用 2 倍，其余一律 4 倍
    pub fn scale_for(preset: Preset) -> u32 {
        if preset == Preset::Double {
            2
        } else {
            4
        }
    }

    pub async fn process(
        &self,
        item: &WorkItem,
        config: &ProcessingConfig,
    ) -> Result<ItemOutput, StrategyError> {
        let token = self.resolve_token(config.credentials.as_deref()).ok_or_else(|| {
            StrategyError::Unavailable(
                "远程放大需要 API Key，请提供 Replicate API Key 或在服务端配置".to_string(),
            )
        })?;

        if !item.source.exists() {
            return Err(StrategyError::InvalidInput(format!(
                "源文件不存在: {}",
                item.source.display()
            )));
        }

        let bytes = tokio::fs::read(&item.source).await?;
        let original_size = bytes.len() as u64;
        let mime = ImageFormat::from_path(&item.source)
            .map(|f| f.to_mime_type())
            .unwrap_or("image/png");

        let source = item.source.clone();
        let (width, height) = run_blocking(move || Ok(image::image_dimensions(&source)?)).await?;

        let data_uri = format!("data:{};base64,{}", mime, STANDARD.encode(&bytes));
        let scale = Self::scale_for(config.preset);

        info!("开始远程放大: key={}, scale={}", item.key, scale);

        let prediction = self.create_prediction(&token, &data_uri, scale).await?;
        let output_url = self.wait_for_output(&token, prediction).await?;

        let data = self
            .client
            .get(&output_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        tokio::fs::create_dir_all(&self.processed_dir).await?;
        let (filename, path) = output_path(&self.processed_dir, "upscaled-ai", "png");
        tokio::fs::write(&path, &data).await?;

        let output_file = path.clone();
        let (out_w, out_h) =
            run_blocking(move || Ok(image::image_dimensions(&output_file)?)).await?;

        info!("远程放大完成: key={}, 输出={}", item.key, filename);

        Ok(ItemOutput {
            filename,
            path,
            original_dimensions: Dimensions::new(width, height),
            upscaled_dimensions: Dimensions::new(out_w, out_h),
            original_size,
            upscaled_size: data.len() as u64,
            format: "png".to_string(),
            method: "Real-ESRGAN (Cloud AI)".to_string(),
        })
    }

    /// 创建预测
    async fn create_prediction(
        &self,
        token: &str,
        data_uri: &str,
        scale: u32,
    ) -> Result<Prediction, StrategyError> {
        let url = format!("{}/predictions", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "version": self.config.model_version,
            "input": {
                "image": data_uri,
                "scale": scale,
                "face_enhance": false,
            }
        });

        let prediction = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Prediction>()
            .await?;

        debug!("预测已创建: id={}, status={}", prediction.id, prediction.status);
        Ok(prediction)
    }

    /// 轮询预测直到结束，返回输出地址
    async fn wait_for_output(
        &self,
        token: &str,
        mut prediction: Prediction,
    ) -> Result<String, StrategyError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.max_wait_secs);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(100));

        loop {
            match prediction.status.as_str() {
                "succeeded" => {
                    return prediction
                        .output
                        .as_ref()
                        .and_then(extract_output_url)
                        .ok_or_else(|| StrategyError::Remote("预测结果缺少输出地址".to_string()));
                }
                "failed" | "canceled" => {
                    let reason = prediction
                        .error
                        .as_ref()
                        .map(|e| match e {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .unwrap_or_else(|| prediction.status.clone());
                    return Err(StrategyError::Remote(format!("远程放大失败: {}", reason)));
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                warn!("预测 {} 等待超时", prediction.id);
                return Err(StrategyError::Timeout(format!(
                    "远程放大超过 {} 秒未完成，图片可能过大",
                    self.config.max_wait_secs
                )));
            }

            tokio::time::sleep(poll_interval).await;

            let url = prediction
                .urls
                .as_ref()
                .and_then(|u| u.get.clone())
                .unwrap_or_else(|| {
                    format!(
                        "{}/predictions/{}",
                        self.config.base_url.trim_end_matches('/'),
                        prediction.id
                    )
                });

            prediction = self
                .client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await?
                .error_for_status()?
                .json::<Prediction>()
                .await?;
        }
    }
}

/// 输出可能是单个 URL，也可能是 URL 数组
fn extract_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().rev().find_map(|v| v.as_str().map(String::from)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::FailureKind;
    use tempfile::TempDir;

    fn upscaler(server_token: Option<&str>) -> RemoteUpscaler {
        let config = RemoteApiConfig {
            api_token: server_token.map(String::from),
            ..Default::default()
        };
        RemoteUpscaler::new(PathBuf::from("processed"), config).unwrap()
    }

    #[test]
    fn test_resolve_token_precedence() {
        let remote = upscaler(Some("server"));
        assert_eq!(remote.resolve_token(Some("user")).as_deref(), Some("user"));
        assert_eq!(remote.resolve_token(Some("  ")).as_deref(), Some("server"));
        assert_eq!(remote.resolve_token(None).as_deref(), Some("server"));

        let remote = upscaler(None);
        assert!(remote.resolve_token(None).is_none());
    }

    #[test]
    fn test_scale_for_preset() {
        assert_eq!(RemoteUpscaler::scale_for(Preset::Double), 2);
        assert_eq!(RemoteUpscaler::scale_for(Preset::Quadruple), 4);
        assert_eq!(RemoteUpscaler::scale_for(Preset::Hd), 4);
    }

    #[test]
    fn test_extract_output_url() {
        assert_eq!(
            extract_output_url(&json!("https://cdn/out.png")).as_deref(),
            Some("https://cdn/out.png")
        );
        assert_eq!(
            extract_output_url(&json!(["https://cdn/a.png", "https://cdn/b.png"])).as_deref(),
            Some("https://cdn/b.png")
        );
        assert!(extract_output_url(&json!({"url": 1})).is_none());
    }

    #[tokio::test]
    async fn test_missing_token_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let remote = upscaler(None);
        let item = WorkItem::new("a.png", temp_dir.path().join("a.png"));

        let err = remote
            .process(&item, &ProcessingConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::StrategyUnavailable);
    }
}
