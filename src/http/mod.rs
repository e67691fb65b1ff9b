//! HTTP 服务器模块 - 使用 Axum 提供 keep-alive 端点
//!
//! 功能包括：
//! - 存活探测（`/`、`/ping`）
//! - 语音在线健康状态（`/health`）
//! - 运行统计（`/api/stats`）
//! - 请求准入（`/api/admission`）
//! - Prometheus 指标（`/metrics`）

pub mod routes;
pub mod server;

pub use server::{router, HttpServerState, KeepAliveServer};
