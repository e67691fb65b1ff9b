//! HTTP 路由模块
//!
//! 路由结构：
//! - `/`、`/ping`      - 存活探测（托管平台保活）
//! - `/health`         - 每个语音目标的状态；没有健康目标时返回 503
//! - `/api/stats`      - 统计汇总与准入状态
//! - `/api/admission`  - 对一次请求做准入判定
//! - `/metrics`        - Prometheus 抓取端点

pub mod admission;
pub mod health;
pub mod metrics;

use axum::{Router, routing::get};
use crate::http::HttpServerState;

/// 创建所有路由
pub fn create_routes() -> Router<HttpServerState> {
    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .merge(health::create_route())     // /, /ping, /health, /api/stats
        .merge(admission::create_route())  // /api/admission
}
