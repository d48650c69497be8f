//! 错误类型
//!
//! 所有失败都只影响单个请求或单个取件码，不存在进程级致命错误。

use std::io;

/// 错误分类
///
/// 决定 HTTP 层如何呈现错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 客户端输入错误（方法、Content-Type、取件码格式等）
    ClientInput,
    /// 资源错误（磁盘、端口绑定、套接字）
    Resource,
    /// 协议违规（缺少头部行、找不到边界）
    Protocol,
}

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("Content-Type must be multipart/form-data")]
    InvalidContentType,

    #[error("Could not parse file content")]
    Unparseable,

    #[error("invalid code: {0}")]
    InvalidCode(String),

    #[error("no file is associated with code {0}")]
    UnknownCode(u16),

    #[error("code {0} has already been started")]
    AlreadyStarted(u16),

    #[error("no free code left in range {min}..={max}")]
    CodesExhausted { min: u16, max: u16 },

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to port {port}: {source}")]
    Connect {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("malformed header line from file server")]
    MalformedHeader,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ShareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShareError::InvalidContentType
            | ShareError::InvalidCode(_)
            | ShareError::UnknownCode(_)
            | ShareError::AlreadyStarted(_) => ErrorKind::ClientInput,
            ShareError::Unparseable | ShareError::MalformedHeader => ErrorKind::Protocol,
            ShareError::CodesExhausted { .. }
            | ShareError::Bind { .. }
            | ShareError::Connect { .. }
            | ShareError::Timeout(_)
            | ShareError::Io(_) => ErrorKind::Resource,
        }
    }
}

pub type Result<T, E = ShareError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ShareError::InvalidContentType.kind(), ErrorKind::ClientInput);
        assert_eq!(
            ShareError::InvalidCode("abc".into()).kind(),
            ErrorKind::ClientInput
        );
        assert_eq!(ShareError::Unparseable.kind(), ErrorKind::Protocol);
        assert_eq!(ShareError::Timeout("connecting").kind(), ErrorKind::Resource);

        let bind = ShareError::Bind {
            port: 4821,
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(bind.kind(), ErrorKind::Resource);
        assert!(bind.to_string().starts_with("failed to bind port 4821"));
    }
}
