//! 服务配置和持久化
//!
//! 提供监听地址、取件码范围、超时等设置的存储和读取。

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 服务设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP API 监听地址
    pub http_host: String,
    /// HTTP API 端口
    pub http_port: u16,
    /// 一次性文件服务器的监听地址
    pub socket_host: String,
    /// 下载桥连接文件服务器时使用的地址
    pub bridge_host: String,
    /// 上传文件暂存目录
    pub staging_dir: PathBuf,
    /// 下载桥的临时文件目录
    pub download_dir: PathBuf,
    /// 取件码下限（含）
    pub code_min: u16,
    /// 取件码上限（含）
    pub code_max: u16,
    /// 等待下载方连接的超时（秒），0 表示不限
    pub accept_timeout_secs: u64,
    /// 下载桥连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 下载桥单次读取的空闲超时（秒）
    pub io_timeout_secs: u64,
    /// 发送分块大小
    pub chunk_size: usize,
    /// 上传请求体上限
    pub max_upload_bytes: usize,
    /// 取件码结束后删除暂存文件
    pub remove_staged_files: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            socket_host: "0.0.0.0".to_string(),
            bridge_host: "127.0.0.1".to_string(),
            staging_dir: tmp.join("safeshare-uploads"),
            download_dir: tmp,
            code_min: 1024,
            code_max: 9999,
            accept_timeout_secs: 600,
            connect_timeout_secs: 5,
            io_timeout_secs: 30,
            chunk_size: 4096,
            max_upload_bytes: 1024 * 1024 * 1024,
            remove_staged_files: true,
        }
    }
}

impl ServerConfig {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("safeshare")
            .join("settings.toml")
    }

    /// 加载设置（文件不存在或无法解析时使用默认值）
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => {
                        debug!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        warn!("Failed to parse config: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    warn!("Failed to read config file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.code_min == 0 {
            anyhow::bail!("code_min must be greater than 0");
        }
        if self.code_min > self.code_max {
            anyhow::bail!(
                "invalid code range {}..={}",
                self.code_min,
                self.code_max
            );
        }
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }
        Ok(())
    }

    pub fn code_range(&self) -> RangeInclusive<u16> {
        self.code_min..=self.code_max
    }

    /// `None` 表示无限等待
    pub fn accept_timeout(&self) -> Option<Duration> {
        (self.accept_timeout_secs > 0).then(|| Duration::from_secs(self.accept_timeout_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.code_range(), 1024..=9999);
        assert!(config.staging_dir.ends_with("safeshare-uploads"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str("http_port = 9090\ncode_min = 2000").unwrap();
        assert_eq!(config.http_port, 9090);
        assert_eq!(config.code_min, 2000);
        assert_eq!(config.code_max, 9999);
        assert_eq!(config.chunk_size, 4096);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let inverted = ServerConfig {
            code_min: 5000,
            code_max: 4000,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let zero = ServerConfig {
            code_min: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let no_chunk = ServerConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(no_chunk.validate().is_err());
    }

    #[test]
    fn test_accept_timeout_zero_is_unbounded() {
        let config = ServerConfig {
            accept_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.accept_timeout(), None);
        assert_eq!(
            ServerConfig::default().accept_timeout(),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let config = ServerConfig {
            http_port: 18080,
            remove_staged_files: false,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = ServerConfig::load(Some(&path));
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "http_port = \"not a number\"").unwrap();

        assert_eq!(ServerConfig::load(Some(&path)), ServerConfig::default());
    }
}
