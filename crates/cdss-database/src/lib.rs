//! # CDSS数据库模块
//!
//! 负责文档、医学实体与临床推荐的持久化。业务代码只依赖 [`ClinicalStore`] 接口，
//! 默认使用内存存储，配置为 `postgres` 时使用PostgreSQL连接池。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use queries::PgStore;
pub use store::ClinicalStore;
