//! 一次性文件服务器的套接字协议
//!
//! 服务端 → 客户端：
//!
//! ```text
//! Filename: <name>\n
//! <原始文件字节，直到服务端关闭连接>
//! ```
//!
//! 没有长度前缀，EOF 即文件结束。

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const HEADER_PREFIX: &str = "Filename: ";

/// 头部缺失或无法识别时使用的文件名
pub const DEFAULT_FILE_NAME: &str = "downloaded-file";

/// 头部行的最大长度（不含换行符）
pub const MAX_HEADER_LEN: usize = 4096;

/// 文件头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub file_name: String,
}

impl std::fmt::Display for FileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", HEADER_PREFIX, self.file_name)
    }
}

impl FileHeader {
    pub fn new(file_name: &str) -> Self {
        Self {
            file_name: sanitize_file_name(file_name)
                .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
        }
    }

    /// 解析头部行（不含换行符），前缀不匹配时返回 `None`
    pub fn parse(line: &[u8]) -> Option<Self> {
        let line = String::from_utf8_lossy(line);
        let name = line.trim().strip_prefix(HEADER_PREFIX)?;
        Some(Self {
            file_name: sanitize_file_name(name)?,
        })
    }

    /// 编码为以 `\n` 结尾的头部行
    pub fn to_line(&self) -> Vec<u8> {
        format!("{self}\n").into_bytes()
    }
}

/// 只保留路径的最后一段，并替换控制字符和引号
///
/// 结果为空时返回 `None`。
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == '"' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => None,
        _ => Some(cleaned.to_string()),
    }
}

/// 逐字节读取到 `\n` 为止
///
/// 连接在换行前关闭时返回已读取的部分。
pub async fn read_header_line<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    loop {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "header line too long",
            ));
        }
        line.push(byte);
    }
    Ok(line)
}
