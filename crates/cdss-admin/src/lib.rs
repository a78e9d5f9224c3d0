//! # CDSS管理模块
//!
//! 提供配置管理、日志初始化和Prometheus流水线指标等运维功能

pub mod config;
pub mod logging;
pub mod monitoring;

pub use config::{
    CdssConfig, ConfigManager, ConfigValidator, DatabaseBackend, DatabaseConfig, LogFormat,
    LoggingConfig, OcrBackend, PipelineConfig, ServerConfig, StorageConfig,
};
pub use logging::init_tracing;
pub use monitoring::PipelineMetrics;
