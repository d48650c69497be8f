//! HTTP Client - 与守护进程的 HTTP API 通信

use anyhow::{Context, Result, bail};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart;
use safeshare_core::UploadResponse;
use safeshare_core::transfer::protocol::{DEFAULT_FILE_NAME, sanitize_file_name};
use safeshare_core::workflow::UNNAMED_FILE;
use std::path::{Path, PathBuf};

pub const DEFAULT_SERVER: &str = "http://localhost:8080";

pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// 上传文件，返回取件码
    pub async fn upload(&self, file: &Path) -> Result<u16> {
        let content = tokio::fs::read(file)
            .await
            .with_context(|| format!("无法读取文件 {}", file.display()))?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| UNNAMED_FILE.to_string());

        let part = multipart::Part::bytes(content)
            .file_name(name)
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/upload", self.base))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("{}: {}", response.status(), response.text().await?);
        }
        Ok(response.json::<UploadResponse>().await?.port)
    }

    /// 通过 HTTP 下载桥取件，保存到 `output_dir`
    pub async fn download(&self, code: u16, output_dir: &Path) -> Result<PathBuf> {
        let response = self
            .http
            .get(format!("{}/download/{}", self.base, code))
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("{}: {}", response.status(), response.text().await?);
        }

        let name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

        let bytes = response.bytes().await?;
        tokio::fs::create_dir_all(output_dir).await?;
        let path = output_dir.join(name);
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

/// 从 `attachment; filename="..."` 中提取文件名
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let start = value.find("filename=")? + "filename=".len();
    let raw = value[start..].split(';').next()?.trim().trim_matches('"');
    sanitize_file_name(raw)
}
