//! SafeShare Daemon
//!
//! 后台守护进程，负责：
//! - HTTP API（上传、下载桥）
//! - 每个取件码的一次性文件服务器
//! - 收到 Ctrl-C 后停止所有等待中的取件码

mod service;

use anyhow::Result;
use clap::Parser;
use safeshare_core::{LogLevel, ServerConfig, filter_directives};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "safeshare-daemon", version, about = "SafeShare - 取件码文件分享服务")]
struct Args {
    /// 配置文件路径 (默认: ~/.config/safeshare/settings.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// HTTP 监听地址
    #[arg(long)]
    host: Option<String>,
    /// HTTP 端口
    #[arg(short, long)]
    port: Option<u16>,
    /// 暂存目录
    #[arg(long)]
    staging_dir: Option<PathBuf>,
    /// 日志级别 (trace, debug, info, warn, error)，RUST_LOG 优先
    #[arg(short, long)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 桥接 log crate（safeshare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(filter_directives(args.log_level))),
        )
        .try_init();

    let mut config = ServerConfig::load(args.config.as_deref());
    if let Some(host) = args.host {
        config.http_host = host;
    }
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(dir) = args.staging_dir {
        config.staging_dir = dir;
    }

    tracing::info!("SafeShare Daemon starting...");
    service::run_service(config).await
}
