//! 文件存储
//!
//! 上传文件与处理结果分别存放在两个目录，文件名统一为 `<uuid>.<ext>`，
//! 后台任务定期删除超过保留时长的文件。

use crate::config::StorageConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 允许上传的图片扩展名
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff"];

/// 存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("不支持的文件类型: {0}")]
    UnsupportedType(String),

    #[error("非法文件名: {0}")]
    InvalidName(String),

    #[error("文件不存在: {0}")]
    NotFound(String),

    #[error("文件过大: {size} 字节，上限 {limit} 字节")]
    TooLarge { size: u64, limit: u64 },

    #[error("文件读写错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 已保存的上传文件
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    /// 存储文件名
    pub filename: String,
    /// 原始文件名
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(skip)]
    pub path: PathBuf,
}

/// 文件信息
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// 文件存储
#[derive(Debug, Clone)]
pub struct FileStore {
    upload_dir: PathBuf,
    processed_dir: PathBuf,
    max_upload_bytes: u64,
}

impl FileStore {
    /// 创建存储并确保目录存在
    pub fn new(config: &StorageConfig) -> Result<Self> {
        for dir in [&config.upload_dir, &config.processed_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("创建目录失败: {:?}", dir))?;
                info!("✓ 目录已创建: {:?}", dir);
            }
        }

        Ok(Self {
            upload_dir: config.upload_dir.clone(),
            processed_dir: config.processed_dir.clone(),
            max_upload_bytes: config.max_upload_size_mb * 1024 * 1024,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// 保存上传文件
    pub async fn save_upload(
        &self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError> {
        let ext = allowed_extension(original_name)
            .ok_or_else(|| StorageError::UnsupportedType(original_name.to_string()))?;

        let size = bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(StorageError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.upload_dir.join(&filename);
        tokio::fs::write(&path, bytes).await?;

        debug!("保存上传文件: {} -> {}", original_name, filename);

        Ok(StoredFile {
            filename,
            original_name: original_name.to_string(),
            mime_type: mime_guess::from_ext(&ext).first_or_octet_stream().to_string(),
            size,
            path,
        })
    }

    /// 上传文件路径（文件必须存在）
    pub fn upload_path(&self, filename: &str) -> Result<PathBuf, StorageError> {
        resolve_in(&self.upload_dir, filename)
    }

    /// 处理结果路径（文件必须存在）
    pub fn processed_path(&self, filename: &str) -> Result<PathBuf, StorageError> {
        resolve_in(&self.processed_dir, filename)
    }

    /// 上传文件信息
    pub async fn file_info(&self, filename: &str) -> Result<FileInfo, StorageError> {
        let path = self.upload_path(filename)?;
        let meta = tokio::fs::metadata(&path).await?;
        Ok(FileInfo {
            filename: filename.to_string(),
            size: meta.len(),
            modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    /// 删除目录下超过保留时长的文件，返回删除数量
    pub async fn cleanup_old_files(dir: &Path, max_age: Duration) -> usize {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("读取目录失败 {:?}: {}", dir, e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("遍历目录失败 {:?}: {}", dir, e);
                    break;
                }
            };

            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();

            if age > max_age {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        debug!("删除过期文件: {:?}", entry.path());
                        removed += 1;
                    }
                    Err(e) => warn!("删除文件失败 {:?}: {}", entry.path(), e),
                }
            }
        }

        removed
    }

    /// 启动定期清理任务，直到 token 被取消
    pub fn start_cleanup_task(
        &self,
        interval: Duration,
        max_age: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let dirs = [self.upload_dir.clone(), self.processed_dir.clone()];

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut removed = 0;
                        for dir in &dirs {
                            removed += Self::cleanup_old_files(dir, max_age).await;
                        }
                        if removed > 0 {
                            info!("🧹 清理了 {} 个过期文件", removed);
                        }
                    }
                }
            }

            debug!("文件清理任务已停止");
        })
    }
}

/// 取出允许的扩展名（小写）
fn allowed_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// 只接受单层文件名，拒绝目录穿越
fn resolve_in(dir: &Path, filename: &str) -> Result<PathBuf, StorageError> {
    let valid = !filename.is_empty()
        && !filename.contains(['/', '\\'])
        && filename != "."
        && filename != "..";
    if !valid {
        return Err(StorageError::InvalidName(filename.to_string()));
    }

    let path = dir.join(filename);
    if !path.is_file() {
        return Err(StorageError::NotFound(filename.to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> FileStore {
        let config = StorageConfig {
            upload_dir: tmp.path().join("uploads"),
            processed_dir: tmp.path().join("processed"),
            max_upload_size_mb: 1,
            ..StorageConfig::default()
        };
        FileStore::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_save_upload() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store.upload_dir().is_dir());
        assert!(store.processed_dir().is_dir());

        let saved = store.save_upload("Photo.PNG", b"fake").await.unwrap();
        assert!(saved.filename.ends_with(".png"));
        assert_eq!(saved.mime_type, "image/png");
        assert_eq!(saved.size, 4);
        assert_eq!(store.upload_path(&saved.filename).unwrap(), saved.path);

        let info = store.file_info(&saved.filename).await.unwrap();
        assert_eq!(info.size, 4);
        assert!(info.modified_at.is_some());

        let jpeg = store.save_upload("scan.jpg", b"fake").await.unwrap();
        assert_eq!(jpeg.mime_type, "image/jpeg");
        let webp = store.save_upload("icon.webp", b"fake").await.unwrap();
        assert_eq!(webp.mime_type, "image/webp");
    }

    #[tokio::test]
    async fn test_rejects_bad_uploads() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        assert!(matches!(
            store.save_upload("notes.txt", b"x").await,
            Err(StorageError::UnsupportedType(_))
        ));
        assert!(matches!(
            store.save_upload("noext", b"x").await,
            Err(StorageError::UnsupportedType(_))
        ));

        let big = vec![0u8; 1024 * 1024 + 1];
        assert!(matches!(
            store.save_upload("big.jpg", &big).await,
            Err(StorageError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_path_traversal_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        assert!(matches!(
            store.upload_path("../secret.png"),
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            store.processed_path(".."),
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            store.processed_path("missing.png"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_old_files() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("a.png"), b"a").unwrap();
        std::fs::write(dir.join("b.png"), b"b").unwrap();

        assert_eq!(
            FileStore::cleanup_old_files(dir, Duration::from_secs(3600)).await,
            0
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            FileStore::cleanup_old_files(dir, Duration::from_millis(1)).await,
            2
        );
        assert!(!dir.join("a.png").exists());
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_cancel() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let token = CancellationToken::new();

        let handle = store.start_cleanup_task(
            Duration::from_millis(10),
            Duration::from_secs(3600),
            token.clone(),
        );
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
