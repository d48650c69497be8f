//! 下载桥
//!
//! 按取件码连接一次性文件服务器，读取头部行，把剩余字节写入临时文件。
//!
//! 流总长度要到 EOF 才知道，先落盘再以正确的 `Content-Length` 回传，
//! 大文件也不会占用内存。临时文件在 [`DownloadedFile`] 释放时删除。

use log::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ShareError};
use crate::transfer::protocol::{DEFAULT_FILE_NAME, FileHeader, read_header_line};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub use bytes_stream::TempFileStream;

/// 解析 URL 路径中的取件码
pub fn parse_code(segment: &str) -> Result<u16> {
    segment
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|code| *code > 0)
        .ok_or_else(|| ShareError::InvalidCode(segment.to_string()))
}

/// 已下载到临时文件的内容
#[derive(Debug)]
pub struct DownloadedFile {
    pub file_name: String,
    pub size: u64,
    path: TempPath,
}

impl DownloadedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 转换为字节流，流结束（或被丢弃）后删除临时文件
    pub async fn into_stream(self) -> Result<TempFileStream> {
        let file = File::open(&self.path).await?;
        Ok(TempFileStream::new(file, self.path))
    }

    /// 移动到目标目录，返回最终路径
    pub async fn persist(self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let target = dir.join(&self.file_name);

        match self.path.persist(&target) {
            Ok(()) => Ok(target),
            Err(e) => {
                // 跨文件系统时 rename 失败，退回复制
                debug!("Rename failed ({}), copying instead", e.error);
                tokio::fs::copy(&e.path, &target).await?;
                Ok(target)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadBridge {
    host: String,
    temp_dir: PathBuf,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl DownloadBridge {
    pub fn new(host: &str, temp_dir: PathBuf) -> Self {
        let defaults = ServerConfig::default();
        Self {
            host: host.to_string(),
            temp_dir,
            connect_timeout: defaults.connect_timeout(),
            io_timeout: defaults.io_timeout(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            host: config.bridge_host.clone(),
            temp_dir: config.download_dir.clone(),
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, io_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.io_timeout = io_timeout;
        self
    }

    /// 连接取件码对应的端口并接收文件
    pub async fn fetch(&self, code: u16) -> Result<DownloadedFile> {
        let stream = timed(
            self.connect_timeout,
            "connecting to the file server",
            TcpStream::connect((self.host.as_str(), code)),
        )
        .await?
        .map_err(|source| ShareError::Connect { port: code, source })?;

        debug!("Connected to file server on port {}", code);
        let mut reader = BufReader::new(stream);

        let line = timed(
            self.io_timeout,
            "reading the header line",
            read_header_line(&mut reader),
        )
        .await??;
        let file_name = match FileHeader::parse(&line) {
            Some(header) => header.file_name,
            None => {
                warn!("Missing filename header from port {}, using default", code);
                DEFAULT_FILE_NAME.to_string()
            }
        };

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let path = tempfile::Builder::new()
            .prefix("download-")
            .suffix(".tmp")
            .tempfile_in(&self.temp_dir)?
            .into_temp_path();

        let mut output = File::create(&path).await?;
        let mut buffer = vec![0u8; 8192];
        let mut size: u64 = 0;
        loop {
            let n = timed(self.io_timeout, "reading file data", reader.read(&mut buffer)).await??;
            if n == 0 {
                break;
            }
            output.write_all(&buffer[..n]).await?;
            size += n as u64;
        }
        output.flush().await?;

        info!("Received {} ({} bytes) from port {}", file_name, size, code);

        Ok(DownloadedFile {
            file_name,
            size,
            path,
        })
    }
}

async fn timed<F: Future>(limit: Duration, what: &'static str, fut: F) -> Result<F::Output> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ShareError::Timeout(what))
}

mod bytes_stream {
    use axum::body::Bytes;
    use futures_util::Stream;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempPath;
    use tokio::fs::File;
    use tokio_util::io::ReaderStream;

    /// 持有临时文件路径的读取流
    pub struct TempFileStream {
        inner: ReaderStream<File>,
        _path: TempPath,
    }

    impl TempFileStream {
        pub(super) fn new(file: File, path: TempPath) -> Self {
            Self {
                inner: ReaderStream::new(file),
                _path: path,
            }
        }
    }

    impl Stream for TempFileStream {
        type Item = io::Result<Bytes>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.inner).poll_next(cx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::net::TcpListener;

    /// 只接受一个连接并写入给定字节的测试服务器
    async fn serve_raw(payload: &'static [u8]) -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(payload).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        port
    }

    fn bridge(dir: &Path) -> DownloadBridge {
        DownloadBridge::new("127.0.0.1", dir.to_path_buf())
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(2))
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("4821").unwrap(), 4821);
        assert_eq!(parse_code(" 1024 ").unwrap(), 1024);
        assert!(matches!(parse_code("abc"), Err(ShareError::InvalidCode(_))));
        assert!(parse_code("70000").is_err());
        assert!(parse_code("0").is_err());
        assert!(parse_code("").is_err());
    }

    #[tokio::test]
    async fn test_fetch_reads_header_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let port = serve_raw(b"Filename: note.txt\nhello\nworld\x00\xff").await;

        let file = bridge(dir.path()).fetch(port).await.unwrap();
        assert_eq!(file.file_name, "note.txt");
        assert_eq!(file.size, 13);
        assert_eq!(
            tokio::fs::read(file.path()).await.unwrap(),
            b"hello\nworld\x00\xff"
        );
    }

    #[tokio::test]
    async fn test_missing_header_uses_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let port = serve_raw(b"garbage line\npayload").await;

        let file = bridge(dir.path()).fetch(port).await.unwrap();
        assert_eq!(file.file_name, DEFAULT_FILE_NAME);
        assert_eq!(tokio::fs::read(file.path()).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        let dir = tempfile::tempdir().unwrap();
        // 绑定后立即释放，端口上没有监听者
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let started = std::time::Instant::now();
        let err = bridge(dir.path()).fetch(port).await.unwrap_err();
        assert!(
            matches!(err, ShareError::Connect { .. } | ShareError::Timeout(_)),
            "unexpected error: {err}"
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stalled_server_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
            drop(stream);
        });

        let bridge = DownloadBridge::new("127.0.0.1", dir.path().to_path_buf())
            .with_timeouts(Duration::from_secs(1), Duration::from_millis(200));
        let err = bridge.fetch(port).await.unwrap_err();
        assert!(matches!(err, ShareError::Timeout(_)));
        server.abort();
    }

    #[tokio::test]
    async fn test_temp_file_removed_after_stream() {
        let dir = tempfile::tempdir().unwrap();
        let port = serve_raw(b"Filename: a.bin\nabcdef").await;

        let file = bridge(dir.path()).fetch(port).await.unwrap();
        let temp_path = file.path().to_path_buf();
        assert!(temp_path.exists());

        let mut stream = file.into_stream().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"abcdef");
        drop(stream);
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let port = serve_raw(b"Filename: a.bin\nabc").await;

        let file = bridge(dir.path()).fetch(port).await.unwrap();
        let temp_path = file.path().to_path_buf();
        drop(file);
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_persist_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let port = serve_raw(b"Filename: kept.txt\nkeep").await;

        let file = bridge(dir.path()).fetch(port).await.unwrap();
        let saved = file.persist(out.path()).await.unwrap();
        assert_eq!(saved, out.path().join("kept.txt"));
        assert_eq!(tokio::fs::read(&saved).await.unwrap(), b"keep");
    }
}
