//! # CDSS存储模块
//!
//! 负责上传文档原始字节的存储。文档存储是外部协作方，业务代码只通过
//! [`DocumentStorage`] 接口访问。

pub mod storage;

pub use storage::*;
