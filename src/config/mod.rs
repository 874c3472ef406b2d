// 配置管理模块

use crate::mirror::checksum::DigestAlgorithm;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 访问令牌环境变量（配置文件未设置令牌时使用）
pub const ACCESS_TOKEN_ENV: &str = "DRIVE_ACCESS_TOKEN";

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Drive 接口配置
    #[serde(default)]
    pub drive: DriveConfig,
    /// 镜像配置
    #[serde(default)]
    pub mirror: MirrorConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// Drive 接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    /// API 根地址
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// OAuth 访问令牌，为空时读取环境变量 DRIVE_ACCESS_TOKEN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// 元数据请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 建立连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 列表每页条目数（Drive 上限 1000）
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_api_base() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    1000
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            access_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

impl DriveConfig {
    /// 获取访问令牌：配置优先，其次环境变量
    pub fn resolve_access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

/// 镜像配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// 远程根目录ID
    #[serde(default)]
    pub root_id: String,
    /// 本地保存目录
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    /// 中转目录ID（自己账号下的文件夹或共享盘）
    #[serde(default)]
    pub staging_container_id: String,
    /// 同时传输的文件数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 是否先复制到中转目录再下载（绕过文件所有者的流量配额）
    #[serde(default = "default_bypass_quota")]
    pub bypass_quota: bool,
    /// 是否递归镜像子目录
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// 本地已完整的文件是否也做一次校验
    #[serde(default)]
    pub verify_existing: bool,
    /// 校验失败后最多重新下载的次数
    #[serde(default = "default_max_integrity_retries")]
    pub max_integrity_retries: u32,
    /// 进度输出间隔（毫秒）
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// 校验时每次读取的字节数
    #[serde(default = "default_checksum_buffer_bytes")]
    pub checksum_buffer_bytes: usize,
    /// 续传校验使用的摘要算法（md5 / sha1 / sha256），远程缺少该摘要时退回 MD5
    #[serde(default)]
    pub checksum_algorithm: DigestAlgorithm,
}

fn default_destination() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_concurrency() -> usize {
    2
}

fn default_bypass_quota() -> bool {
    true
}

fn default_recursive() -> bool {
    true
}

fn default_max_integrity_retries() -> u32 {
    3
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_checksum_buffer_bytes() -> usize {
    2 * 1024 * 1024 // 2MB
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            root_id: String::new(),
            destination: default_destination(),
            staging_container_id: String::new(),
            concurrency: default_concurrency(),
            bypass_quota: default_bypass_quota(),
            recursive: default_recursive(),
            verify_existing: false,
            max_integrity_retries: default_max_integrity_retries(),
            progress_interval_ms: default_progress_interval_ms(),
            checksum_buffer_bytes: default_checksum_buffer_bytes(),
            checksum_algorithm: DigestAlgorithm::default(),
        }
    }
}

impl MirrorConfig {
    /// 校验镜像配置
    pub fn validate(&self) -> Result<()> {
        if self.root_id.trim().is_empty() {
            anyhow::bail!("未设置远程根目录ID (mirror.root_id)");
        }
        if self.destination.as_os_str().is_empty() {
            anyhow::bail!("未设置本地保存目录 (mirror.destination)");
        }
        if self.concurrency == 0 {
            anyhow::bail!("并发数必须大于 0 (mirror.concurrency)");
        }
        if self.bypass_quota && self.staging_container_id.trim().is_empty() {
            anyhow::bail!(
                "启用中转复制时必须设置中转目录ID (mirror.staging_container_id)，\
                 或设置 bypass_quota = false 直接下载"
            );
        }
        if self.checksum_buffer_bytes == 0 {
            anyhow::bail!("校验缓冲区大小必须大于 0 (mirror.checksum_buffer_bytes)");
        }
        Ok(())
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config: AppConfig = toml::from_str(&content).context("解析配置文件失败")?;
        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        // 确保父目录存在
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("创建配置目录失败")?;
        }

        fs::write(path, content).await.context("写入配置文件失败")?;

        tracing::info!("✓ 配置已保存: {:?}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {:?}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 首次启动：写出一份默认配置供用户编辑
                if !path.exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {:#}", e);
                    }
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.mirror.concurrency, 2);
        assert!(config.mirror.bypass_quota);
        assert_eq!(config.mirror.max_integrity_retries, 3);
        assert_eq!(config.mirror.progress_interval_ms, 500);
        assert_eq!(config.drive.page_size, 1000);
        assert_eq!(config.log.level, "info");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("app.toml");

        let mut config = AppConfig::default();
        config.mirror.root_id = "root123".to_string();
        config.mirror.concurrency = 8;
        config.save_to_file(&path).await.unwrap();

        let loaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.mirror.root_id, "root123");
        assert_eq!(loaded.mirror.concurrency, 8);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [mirror]
            root_id = "abc"
            staging_container_id = "stage"
            "#,
        )
        .unwrap();

        assert_eq!(config.mirror.root_id, "abc");
        assert_eq!(config.mirror.concurrency, 2);
        assert_eq!(config.mirror.checksum_buffer_bytes, 2 * 1024 * 1024);
        assert_eq!(config.mirror.checksum_algorithm, DigestAlgorithm::Md5);
        assert!(config.mirror.validate().is_ok());
    }

    #[test]
    fn test_checksum_algorithm_from_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [mirror]
            checksum_algorithm = "sha256"
            "#,
        )
        .unwrap();
        assert_eq!(config.mirror.checksum_algorithm, DigestAlgorithm::Sha256);

        let bad = toml::from_str::<AppConfig>(
            r#"
            [mirror]
            checksum_algorithm = "crc32"
            "#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_mirror_validation() {
        let mut config = MirrorConfig {
            root_id: "root".to_string(),
            ..MirrorConfig::default()
        };
        // 启用中转但没有中转目录
        assert!(config.validate().is_err());

        config.bypass_quota = false;
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_access_token_from_config() {
        let config = DriveConfig {
            access_token: Some("ya29.token".to_string()),
            ..DriveConfig::default()
        };
        assert_eq!(config.resolve_access_token().as_deref(), Some("ya29.token"));
    }
}
