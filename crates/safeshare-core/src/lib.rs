//! SafeShare Core Library
//!
//! 通过取件码分享文件：上传后得到一个数字取件码，取件码同时也是
//! 一次性文件服务器监听的端口。下载方可以直接连接该端口，
//! 也可以通过 HTTP 下载桥取回文件。
//!
//! # 模块
//!
//! - **transfer**: multipart 解析、取件码注册表、一次性服务器、下载桥、HTTP API
//! - **workflow**: 暂存并分享上传文件
//! - **config**: 服务配置
//! - **error**: 错误类型
//! - **logging**: 日志级别和过滤指令
//!
//! # 使用示例
//!
//! ## 启动服务
//!
//! ```ignore
//! use safeshare_core::{ApiServer, ServerConfig};
//!
//! let config = ServerConfig::load(None);
//! let server = ApiServer::bind(&config).await?;
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```
//!
//! ## 直接通过套接字取件
//!
//! ```ignore
//! use safeshare_core::DownloadBridge;
//!
//! let bridge = DownloadBridge::new("127.0.0.1", std::env::temp_dir());
//! let file = bridge.fetch(4821).await?;
//! let saved = file.persist(&output_dir).await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod transfer;
pub mod workflow;

pub use config::ServerConfig;
pub use error::{ErrorKind, ShareError};
pub use logging::{LogLevel, filter_directives};

// Transfer re-exports
pub use transfer::{
    ApiServer, CodeEvent, CodeRegistry, CodeState, DownloadBridge, DownloadedFile, FileHeader,
    FileRecord, MultipartParser, OneShotServer, ParsedUpload, ServeOptions, UploadResponse,
    parse_code,
};

// Workflow re-exports
pub use workflow::FileSharer;
