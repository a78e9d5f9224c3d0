//! 错误定义模块

use thiserror::Error;

/// 临床决策支持系统统一错误类型
#[derive(Error, Debug)]
pub enum CdssError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("网络错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("未认证: {0}")]
    Unauthorized(String),

    #[error("并发冲突: {0}")]
    Conflict(String),

    /// 规则无法解析实体的数值或结构化元数据，由调用方跳过该实体
    #[error("实体元数据格式错误 (实体 {entity_id}): {message}")]
    MalformedEntityMetadata { entity_id: String, message: String },

    /// 外部服务（OCR、术语服务）失败或超时，可重试
    #[error("上游服务 {service} 失败: {message}")]
    Upstream { service: String, message: String },

    #[error("{stage} 阶段处理失败: {message}")]
    Processing { stage: String, message: String },

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl CdssError {
    /// 是否可由调用方重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, CdssError::Upstream { .. } | CdssError::Conflict(_))
    }

    /// 已分类的错误原样返回，其余错误归入指定阶段的处理错误
    pub fn in_stage(self, stage: &str) -> CdssError {
        match self {
            CdssError::NotFound(_)
            | CdssError::Validation(_)
            | CdssError::Unauthorized(_)
            | CdssError::Conflict(_)
            | CdssError::Upstream { .. }
            | CdssError::Processing { .. }
            | CdssError::InvalidStateTransition { .. } => self,
            other => CdssError::Processing {
                stage: stage.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for CdssError {
    fn from(e: sqlx::Error) -> Self {
        CdssError::Database(e.to_string())
    }
}

/// 临床决策支持系统统一结果类型
pub type Result<T> = std::result::Result<T, CdssError>;
