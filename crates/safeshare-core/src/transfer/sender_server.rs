//! 一次性文件服务器
//!
//! 每个取件码对应一个监听在该端口上的服务器，只接受一个连接：
//!
//! 1. `start` 返回前端口已经绑定完成，之后才把取件码交给上传方
//! 2. 后台任务等待连接（受超时和取消令牌约束）
//! 3. 接受连接后立即关闭监听，发送头部行和文件内容
//! 4. 结束后从注册表移除取件码，按配置删除暂存文件

use log::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ShareError};
use crate::transfer::protocol::FileHeader;
use crate::transfer::registry::{CodeRegistry, CodeState, FileRecord};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 服务器选项
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// 监听地址（端口由取件码决定）
    pub host: String,
    /// 等待连接的超时，`None` 表示不限
    pub accept_timeout: Option<Duration>,
    pub chunk_size: usize,
    /// 结束后删除暂存文件
    pub remove_staged_file: bool,
}

impl ServeOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            host: config.socket_host.clone(),
            accept_timeout: config.accept_timeout(),
            chunk_size: config.chunk_size,
            remove_staged_file: config.remove_staged_files,
        }
    }
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// 已启动的服务器句柄
pub struct OneShotHandle {
    local_addr: SocketAddr,
    task: JoinHandle<CodeState>,
}

impl OneShotHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 等待服务器结束，返回终态
    pub async fn wait(self) -> CodeState {
        self.task
            .await
            .unwrap_or_else(|e| CodeState::Failed(e.to_string()))
    }
}

pub struct OneShotServer;

impl OneShotServer {
    /// 绑定取件码对应的端口并在后台等待下载方
    ///
    /// 返回 `Ok` 时端口已处于监听状态。同一取件码只能启动一次。
    pub async fn start(
        registry: Arc<CodeRegistry>,
        code: u16,
        options: ServeOptions,
        cancel: CancellationToken,
    ) -> Result<OneShotHandle> {
        let record = registry.begin_listening(code).await?;

        let bound = match TcpListener::bind((options.host.as_str(), code)).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                warn!("Failed to bind port {}: {}", code, source);
                registry
                    .finish(code, CodeState::Failed(source.to_string()))
                    .await;
                return Err(ShareError::Bind { port: code, source });
            }
        };

        info!(
            "Serving file {} on port {}",
            record.file_name, local_addr
        );

        let task = tokio::spawn(run(listener, record, registry, options, cancel));

        Ok(OneShotHandle {
            local_addr,
            task,
        })
    }
}

async fn run(
    listener: TcpListener,
    record: FileRecord,
    registry: Arc<CodeRegistry>,
    options: ServeOptions,
    cancel: CancellationToken,
) -> CodeState {
    let code = record.code;

    let accepted = tokio::select! {
        () = cancel.cancelled() => None,
        res = accept(&listener, options.accept_timeout) => res,
    };

    // 不再接受新连接
    drop(listener);

    let state = match accepted {
        Some(Ok((stream, peer))) => {
            info!("Client connection on port {}: {}", code, peer);
            registry.mark_serving(code).await;
            match send_file(stream, &record, options.chunk_size).await {
                Ok(sent) => {
                    info!("File {} sent to {} ({} bytes)", record.file_name, peer, sent);
                    CodeState::Served
                }
                Err(e) => {
                    error!("Error sending file to client: {}", e);
                    CodeState::Failed(e.to_string())
                }
            }
        }
        Some(Err(e)) => {
            error!("Error accepting connection on port {}: {}", code, e);
            CodeState::Failed(e.to_string())
        }
        None => {
            info!("Code {} expired without a download", code);
            CodeState::Expired
        }
    };

    registry.finish(code, state.clone()).await;

    if options.remove_staged_file {
        match tokio::fs::remove_file(&record.file_path).await {
            Ok(()) => debug!("Removed staged file {:?}", record.file_path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged file {:?}: {}", record.file_path, e),
        }
    }

    state
}

/// 超时返回 `None`
async fn accept(
    listener: &TcpListener,
    timeout: Option<Duration>,
) -> Option<io::Result<(TcpStream, SocketAddr)>> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, listener.accept()).await.ok(),
        None => Some(listener.accept().await),
    }
}

/// 发送头部行和文件内容，返回发送的文件字节数
async fn send_file(mut stream: TcpStream, record: &FileRecord, chunk_size: usize) -> io::Result<u64> {
    let mut file = File::open(&record.file_path).await?;

    stream
        .write_all(&FileHeader::new(&record.file_name).to_line())
        .await?;

    let mut buffer = vec![0u8; chunk_size];
    let mut sent: u64 = 0;
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buffer[..n]).await?;
        sent += n as u64;
    }

    stream.flush().await?;
    stream.shutdown().await?;
    Ok(sent)
}
