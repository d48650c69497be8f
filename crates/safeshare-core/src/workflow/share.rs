//! 上传分享工作流
//!
//! 高层 API 封装完整的分享流程:
//! 1. 把解析出的文件写入暂存目录
//! 2. 分配取件码
//! 3. 启动一次性文件服务器（返回前端口已在监听）
//!
//! 端口已被其他程序占用时换一个取件码重试。

use log::{info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ShareError};
use crate::transfer::multipart::ParsedUpload;
use crate::transfer::protocol::sanitize_file_name;
use crate::transfer::registry::{CodeRegistry, FileRecord};
use crate::transfer::sender_server::{OneShotServer, ServeOptions};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 上传文件名为空时使用的名称
pub const UNNAMED_FILE: &str = "unnamed-file";

/// 端口被占用时最多尝试的取件码数量
const BIND_ATTEMPTS: usize = 8;

pub struct FileSharer {
    registry: Arc<CodeRegistry>,
    staging_dir: PathBuf,
    options: ServeOptions,
    cancel: CancellationToken,
}

impl FileSharer {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            registry: Arc::new(CodeRegistry::with_reserved(
                config.code_range(),
                [config.http_port],
            )),
            staging_dir: config.staging_dir.clone(),
            options: ServeOptions::from_config(config),
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> Arc<CodeRegistry> {
        self.registry.clone()
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// 写入暂存目录，返回 (路径, 文件名)
    ///
    /// 暂存文件名带 UUID 前缀，避免同名上传互相覆盖。
    pub async fn stage(&self, upload: &ParsedUpload) -> Result<(PathBuf, String)> {
        let file_name =
            sanitize_file_name(&upload.file_name).unwrap_or_else(|| UNNAMED_FILE.to_string());

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let path = self
            .staging_dir
            .join(format!("{}_{}", uuid::Uuid::new_v4(), file_name));
        tokio::fs::write(&path, &upload.content).await?;

        info!(
            "Staged {} ({} bytes, {}) at {:?}",
            file_name,
            upload.content.len(),
            upload.content_type,
            path
        );
        Ok((path, file_name))
    }

    /// 为已暂存的文件分配取件码并启动一次性服务器
    ///
    /// 绑定失败时服务器已把取件码移出注册表；最终失败时删除暂存文件。
    pub async fn offer(&self, file_path: PathBuf, file_name: String) -> Result<u16> {
        let mut tried = HashSet::new();
        let mut last_bind_error = None;

        let result = loop {
            let code = match self
                .registry
                .allocate_excluding(file_path.clone(), file_name.clone(), &tried)
                .await
            {
                Ok(code) => code,
                // 范围内的空闲取件码都试过了
                Err(e) => break Err(last_bind_error.unwrap_or(e)),
            };

            match OneShotServer::start(
                self.registry.clone(),
                code,
                self.options.clone(),
                self.cancel.child_token(),
            )
            .await
            {
                Ok(_handle) => break Ok(code),
                Err(ShareError::Bind { port, source })
                    if source.kind() == io::ErrorKind::AddrInUse
                        && tried.len() + 1 < BIND_ATTEMPTS =>
                {
                    warn!("Port {} is in use, trying another code", port);
                    tried.insert(code);
                    last_bind_error = Some(ShareError::Bind { port, source });
                }
                Err(e) => break Err(e),
            }
        };

        if result.is_err() {
            remove_staged(&file_path).await;
        }
        result
    }

    /// 暂存并分享
    pub async fn share(&self, upload: &ParsedUpload) -> Result<u16> {
        let (path, file_name) = self.stage(upload).await?;
        self.offer(path, file_name).await
    }

    /// 停止所有等待中的服务器，清空注册表并删除暂存文件
    pub async fn shutdown(&self) -> Vec<FileRecord> {
        self.cancel.cancel();
        let records = self.registry.clear().await;
        for record in &records {
            remove_staged(&record.file_path).await;
        }
        info!("File sharer stopped, {} pending codes dropped", records.len());
        records
    }
}

async fn remove_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove staged file {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::registry::CodeState;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    fn config(dir: &Path, min: u16, max: u16) -> ServerConfig {
        ServerConfig {
            socket_host: "127.0.0.1".to_string(),
            staging_dir: dir.join("staging"),
            code_min: min,
            code_max: max,
            accept_timeout_secs: 10,
            ..Default::default()
        }
    }

    fn upload(name: &str, content: &[u8]) -> ParsedUpload {
        ParsedUpload {
            file_name: name.to_string(),
            content: content.to_vec(),
            content_type: "text/plain".to_string(),
        }
    }

    #[tokio::test]
    async fn test_stage_writes_prefixed_file() {
        let dir = tempfile::tempdir().unwrap();
        let sharer = FileSharer::new(&config(dir.path(), 22201, 22210));

        let (path, name) = sharer.stage(&upload("../x/note.txt", b"hi")).await.unwrap();
        assert_eq!(name, "note.txt");
        assert!(path.starts_with(sharer.staging_dir()));
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with("_note.txt")
        );
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hi");

        let (_, name) = sharer.stage(&upload("", b"x")).await.unwrap();
        assert_eq!(name, UNNAMED_FILE);
    }

    #[tokio::test]
    async fn test_share_is_listening_before_return() {
        let dir = tempfile::tempdir().unwrap();
        let sharer = FileSharer::new(&config(dir.path(), 22211, 22220));

        let code = sharer.share(&upload("note.txt", b"hello world")).await.unwrap();
        assert_eq!(
            sharer.registry().state(code).await,
            Some(CodeState::Listening)
        );

        let mut stream = TcpStream::connect(("127.0.0.1", code)).await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"Filename: note.txt\nhello world");
    }

    #[tokio::test]
    async fn test_bind_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let sharer = FileSharer::new(&config(dir.path(), 22231, 22231));
        let _occupied = tokio::net::TcpListener::bind(("127.0.0.1", 22231))
            .await
            .unwrap();

        let err = sharer.share(&upload("a.txt", b"a")).await.unwrap_err();
        assert!(matches!(err, ShareError::Bind { port: 22231, .. }));
        assert!(sharer.registry().is_empty().await);

        let mut entries = tokio::fs::read_dir(sharer.staging_dir()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_occupied_port_falls_back_to_free_code() {
        let dir = tempfile::tempdir().unwrap();
        let sharer = FileSharer::new(&config(dir.path(), 22261, 22262));
        let _occupied = tokio::net::TcpListener::bind(("127.0.0.1", 22261))
            .await
            .unwrap();

        for _ in 0..5 {
            let code = sharer.share(&upload("a.txt", b"a")).await.unwrap();
            assert_eq!(code, 22262);

            let mut stream = TcpStream::connect(("127.0.0.1", code)).await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            assert_eq!(received, b"Filename: a.txt\na");

            // 等待服务器移除取件码后再上传下一个
            while sharer.registry().lookup(code).await.is_some() {
                tokio::task::yield_now().await;
            }
        }
    }

    #[tokio::test]
    async fn test_http_port_is_never_a_code() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            http_port: 22271,
            ..config(dir.path(), 22271, 22272)
        };
        let sharer = FileSharer::new(&config);

        let code = sharer.share(&upload("a.txt", b"a")).await.unwrap();
        assert_eq!(code, 22272);

        let err = sharer.share(&upload("b.txt", b"b")).await.unwrap_err();
        assert!(matches!(err, ShareError::CodesExhausted { .. }));
        sharer.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_pending_servers() {
        let dir = tempfile::tempdir().unwrap();
        let sharer = FileSharer::new(&config(dir.path(), 22241, 22250));
        let mut events = sharer.registry().subscribe();

        let code = sharer.share(&upload("a.txt", b"a")).await.unwrap();
        let record = sharer.registry().lookup(code).await.unwrap();

        let dropped = sharer.shutdown().await;
        assert_eq!(dropped.len(), 1);
        assert!(!record.file_path.exists());

        // 等待后台任务关闭监听
        loop {
            let event = events.recv().await.unwrap();
            if event.code == code && event.state.is_terminal() {
                assert_eq!(event.state, CodeState::Expired);
                break;
            }
        }
        assert!(TcpStream::connect(("127.0.0.1", code)).await.is_err());
    }
}
