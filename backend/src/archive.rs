//! 结果打包
//!
//! 把处理结果打成 ZIP（deflate，压缩级别 9），在阻塞线程池中完成。

use anyhow::{Context, Result};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// 打包文件，返回 ZIP 字节与实际写入的文件数；不存在的文件会被跳过
pub async fn build_zip(files: Vec<(String, PathBuf)>) -> Result<(Vec<u8>, usize)> {
    tokio::task::spawn_blocking(move || write_zip(&files))
        .await
        .context("打包线程异常退出")?
}

fn write_zip(files: &[(String, PathBuf)]) -> Result<(Vec<u8>, usize)> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut written = 0;
    for (name, path) in files {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!("跳过无法读取的文件 {:?}: {}", path, e);
                continue;
            }
        };

        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("写入压缩条目失败: {}", name))?;
        writer.write_all(&data)?;
        written += 1;
    }

    let cursor = writer.finish().context("完成 ZIP 写入失败")?;
    debug!("ZIP 打包完成: {} 个文件", written);
    Ok((cursor.into_inner(), written))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_zip_skips_missing() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.png");
        std::fs::write(&a, b"first image").unwrap();

        let (bytes, written) = build_zip(vec![
            ("a.png".to_string(), a),
            ("gone.png".to_string(), tmp.path().join("gone.png")),
        ])
        .await
        .unwrap();
        assert_eq!(written, 1);

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);

        let mut entry = archive.by_name("a.png").unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "first image");
    }

    #[tokio::test]
    async fn test_empty_zip() {
        let (bytes, written) = build_zip(Vec::new()).await.unwrap();
        assert_eq!(written, 0);
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
