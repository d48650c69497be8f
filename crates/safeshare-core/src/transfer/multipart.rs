//! multipart/form-data 解析
//!
//! 只支持单个文件 part 的请求体：
//!
//! ```text
//! --XYZ\r\n
//! Content-Disposition: form-data; name="file"; filename="a.txt"\r\n
//! Content-Type: text/plain\r\n
//! \r\n
//! hello\r\n
//! --XYZ--\r\n
//! ```
//!
//! # 已知限制
//!
//! - 不处理多个 part、嵌套边界或百分号编码的文件名
//! - 文件内容中若出现 `\r\n--<boundary>` 字节序列会被提前截断

use crate::error::{Result, ShareError};
use crate::transfer::scanner::find;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const FILENAME_MARKER: &[u8] = b"filename=\"";
const CONTENT_TYPE_MARKER: &[u8] = b"Content-Type:";
const HEADER_END: &[u8] = b"\r\n\r\n";
const LINE_END: &[u8] = b"\r\n";

/// 解析出的上传文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUpload {
    pub file_name: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

pub struct MultipartParser<'a> {
    data: &'a [u8],
    boundary: &'a str,
}

impl<'a> MultipartParser<'a> {
    pub fn new(data: &'a [u8], boundary: &'a str) -> Self {
        Self { data, boundary }
    }

    /// 解析请求体，任何格式问题都返回 `None`
    pub fn parse(&self) -> Option<ParsedUpload> {
        let data = self.data;

        let name_start = find(data, FILENAME_MARKER, 0)? + FILENAME_MARKER.len();
        let name_end = find(data, b"\"", name_start)?;
        let file_name = String::from_utf8_lossy(&data[name_start..name_end]).into_owned();

        let header_end = find(data, HEADER_END, name_end)?;
        let content_start = header_end + HEADER_END.len();

        // Content-Type 只在 part 头部范围内查找
        let headers = &data[..header_end];
        let content_type = find(headers, CONTENT_TYPE_MARKER, name_end)
            .map(|start| {
                let value_start = start + CONTENT_TYPE_MARKER.len();
                let value_end = find(headers, LINE_END, value_start).unwrap_or(header_end);
                String::from_utf8_lossy(&headers[value_start..value_end])
                    .trim()
                    .to_string()
            })
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let final_marker = format!("\r\n--{}--", self.boundary);
        let separator = format!("\r\n--{}", self.boundary);
        let content_end = find(data, final_marker.as_bytes(), content_start)
            .or_else(|| find(data, separator.as_bytes(), content_start))?;
        if content_end <= content_start {
            return None;
        }

        Some(ParsedUpload {
            file_name,
            content: data[content_start..content_end].to_vec(),
            content_type,
        })
    }
}

/// 从请求的 Content-Type 中提取 boundary
///
/// 要求类型为 `multipart/form-data`，去掉引号和后续参数。
pub fn boundary_from_content_type(content_type: &str) -> Result<String> {
    let content_type = content_type.trim();
    let lower = content_type.to_ascii_lowercase();
    if !lower.starts_with("multipart/form-data") {
        return Err(ShareError::InvalidContentType);
    }

    let start = lower
        .find("boundary=")
        .ok_or(ShareError::InvalidContentType)?
        + "boundary=".len();
    let value = content_type[start..]
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('"');

    if value.is_empty() {
        return Err(ShareError::InvalidContentType);
    }
    Ok(value.to_string())
}
