//! 文件传输模块
//!
//! 包含:
//! - multipart/form-data 解析和字节查找
//! - 取件码注册表
//! - 一次性套接字文件服务器及其协议
//! - 下载桥（套接字 → HTTP）
//! - HTTP API 服务器

pub mod bridge;
pub mod http_server;
pub mod multipart;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod sender_server;

pub use bridge::{DownloadBridge, DownloadedFile, TempFileStream, parse_code};
pub use http_server::{ApiServer, AppState, UploadResponse, router};
pub use multipart::{MultipartParser, ParsedUpload, boundary_from_content_type};
pub use protocol::{DEFAULT_FILE_NAME, FileHeader, HEADER_PREFIX};
pub use registry::{CodeEvent, CodeRegistry, CodeState, FileRecord};
pub use sender_server::{OneShotHandle, OneShotServer, ServeOptions};
