//! 工作流模块
//!
//! 提供高层 API 封装完整的上传分享流程

pub mod share;

pub use share::{FileSharer, UNNAMED_FILE};
