//! # CDSS Web模块
//!
//! 基于axum的HTTP接口，将分析流水线、推荐审核、术语标准化与运维端点暴露为JSON API

pub mod error;
pub mod handlers;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{create_app, WebServer};
