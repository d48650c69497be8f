//! 字节序列查找
//!
//! 不做任何编码假设，可用于包含 NUL 或任意二进制内容的数据。

use memchr::memmem;

/// 返回 `needle` 在 `haystack[from..]` 中首次出现的绝对位置
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    let tail = haystack.get(from..)?;
    memmem::find(tail, needle).map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_at_position() {
        assert_eq!(find(b"hello world", b"world", 0), Some(6));
        assert_eq!(find(b"hello world", b"hello", 0), Some(0));
    }

    #[test]
    fn test_not_found() {
        assert_eq!(find(b"hello world", b"xyz", 0), None);
        assert_eq!(find(b"abc", b"abcd", 0), None);
    }

    #[test]
    fn test_first_match_from_offset() {
        let data = b"--XYZ--XYZ--XYZ";
        assert_eq!(find(data, b"XYZ", 0), Some(2));
        assert_eq!(find(data, b"XYZ", 3), Some(7));
        assert_eq!(find(data, b"XYZ", 7), Some(7));
        assert_eq!(find(data, b"XYZ", 13), None);
    }

    #[test]
    fn test_offset_past_end() {
        assert_eq!(find(b"abc", b"a", 3), None);
        assert_eq!(find(b"abc", b"a", 10), None);
    }

    #[test]
    fn test_needle_spanning_nul_bytes() {
        let data = [0xff, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00];
        assert_eq!(find(&data, &[0x00, 0x01, 0x00], 0), Some(2));
        assert_eq!(find(&data, &[0x00, 0x02, 0x00], 0), Some(4));
        assert_eq!(find(&data, &[0x00, 0x03], 0), None);
    }
}
