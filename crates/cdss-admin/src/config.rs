//! 配置管理
//!
//! 内置默认值、可选的TOML配置文件和 `CDSS__*` 环境变量逐层覆盖，加载后统一校验

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<CdssConfig>>,
    /// 配置文件路径
    config_path: Option<String>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CdssConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 文档存储配置
    pub storage: StorageConfig,
    /// 分析流水线配置
    pub pipeline: PipelineConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 请求超时时间（毫秒）
    pub request_timeout_ms: u64,
    /// CORS允许的源，为空时允许任意源
    pub cors_allowed_origins: Vec<String>,
}

/// 数据库后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Memory,
    Postgres,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 存储后端
    pub backend: DatabaseBackend,
    /// 连接字符串
    pub connection_string: String,
    /// 最大连接数
    pub max_connections: u32,
    /// 启动时自动建表
    pub auto_migrate: bool,
}

/// 文档存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// 根目录
    pub root_path: String,
    /// 单个上传文件大小上限
    pub max_upload_bytes: usize,
}

/// 文本提取后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackend {
    PlainText,
    Fixture,
}

/// 分析流水线配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// 文本提取后端
    pub ocr_backend: OcrBackend,
    /// `fixture` 后端返回的固定文本
    pub fixture_text: Option<String>,
    /// 文本提取超时时间（毫秒）
    pub ocr_timeout_ms: u64,
    /// 单次术语查询超时时间（毫秒）
    pub terminology_timeout_ms: u64,
    /// 相同输入指纹的重复规则运行直接返回上一批结果
    pub deduplicate_reruns: bool,
    /// 知识库文件（TOML），为空时使用内置知识库
    pub knowledge_file: Option<String>,
    /// 规则文件（TOML），为空时使用内置规则集
    pub rules_file: Option<String>,
}

/// 日志格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 日志格式
    pub format: LogFormat,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_millis(self.ocr_timeout_ms)
    }

    pub fn terminology_timeout(&self) -> Duration {
        Duration::from_millis(self.terminology_timeout_ms)
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&CdssConfig) -> Result<()>,
}

impl ConfigManager {
    /// 加载配置，`config_path` 为空时只使用默认值和环境变量
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.map(str::to_string),
            validator,
        })
    }

    /// 逐层合并配置源
    fn load_config(config_path: Option<&str>) -> Result<CdssConfig> {
        let defaults = Config::try_from(&CdssConfig::default())
            .context("Failed to build default configuration")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("CDSS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_allowed_origins")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let config: CdssConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub async fn get_config(&self) -> CdssConfig {
        self.config.read().await.clone()
    }

    /// 重新加载配置，校验失败时保留旧配置
    pub async fn reload_config(&self) -> Result<CdssConfig> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.validator.validate(&new_config)?;

        *self.config.write().await = new_config.clone();
        info!("Configuration reloaded");
        Ok(new_config)
    }

    /// 验证当前配置
    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "server.port",
                validator: |config| {
                    anyhow::ensure!(config.server.port != 0, "Server port cannot be 0");
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "server.request_timeout_ms",
                validator: |config| {
                    anyhow::ensure!(config.server.request_timeout_ms > 0, "Request timeout must be positive");
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "database.max_connections",
                validator: |config| {
                    anyhow::ensure!(
                        config.database.max_connections > 0,
                        "Database max connections cannot be 0"
                    );
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "database.connection_string",
                validator: |config| {
                    let missing = config.database.backend == DatabaseBackend::Postgres
                        && config.database.connection_string.trim().is_empty();
                    anyhow::ensure!(!missing, "Postgres backend requires a connection string");
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "storage.max_upload_bytes",
                validator: |config| {
                    anyhow::ensure!(config.storage.max_upload_bytes > 0, "Upload limit cannot be 0");
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "pipeline.ocr_timeout_ms",
                validator: |config| {
                    anyhow::ensure!(
                        config.pipeline.ocr_timeout_ms > 0 && config.pipeline.terminology_timeout_ms > 0,
                        "Pipeline timeouts must be positive"
                    );
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "pipeline.fixture_text",
                validator: |config| {
                    let missing = config.pipeline.ocr_backend == OcrBackend::Fixture
                        && config.pipeline.fixture_text.is_none();
                    anyhow::ensure!(!missing, "Fixture OCR backend requires fixture_text");
                    Ok(())
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &CdssConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(e.context(format!("Invalid configuration value: {}", rule.field_path)));
            }
        }

        info!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_ms: 30_000,
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Memory,
            connection_string: String::new(),
            max_connections: 10,
            auto_migrate: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: "./data/documents".to_string(),
            max_upload_bytes: 20 * 1024 * 1024, // 20MB
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_backend: OcrBackend::PlainText,
            fixture_text: None,
            ocr_timeout_ms: 10_000,
            terminology_timeout_ms: 2_000,
            deduplicate_reruns: false,
            knowledge_file: None,
            rules_file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "cdss-config-{}-{}.toml",
            std::process::id(),
            content.len()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CdssConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
        assert_eq!(config.pipeline.ocr_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_postgres_requires_connection_string() {
        let mut config = CdssConfig::default();
        config.database.backend = DatabaseBackend::Postgres;
        assert!(ConfigValidator::new().validate(&config).is_err());

        config.database.connection_string = "postgres://cdss@localhost/cdss".to_string();
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_fixture_backend_requires_text() {
        let mut config = CdssConfig::default();
        config.pipeline.ocr_backend = OcrBackend::Fixture;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_partial_file_overrides_defaults() {
        let path = write_config(
            r#"
            [server]
            port = 9090

            [pipeline]
            deduplicate_reruns = true
            ocr_backend = "fixture"
            fixture_text = "Blood Pressure: 150/95 mmHg"

            [logging]
            format = "json"
            "#,
        );

        let manager = ConfigManager::new(path.to_str()).unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.pipeline.deduplicate_reruns);
        assert_eq!(config.pipeline.ocr_backend, OcrBackend::Fixture);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.storage.max_upload_bytes, 20 * 1024 * 1024);

        assert!(manager.validate_config().await.is_ok());
        assert_eq!(manager.reload_config().await.unwrap(), config);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let path = write_config("[server]\nport = 0\n");
        assert!(ConfigManager::new(path.to_str()).is_err());
        let _ = std::fs::remove_file(path);
    }
}
