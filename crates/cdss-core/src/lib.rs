//! # CDSS Core
//!
//! 临床决策支持系统的核心模块，提供文档、医学实体、推荐等基础数据结构、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{CdssError, Result};
pub use models::*;
