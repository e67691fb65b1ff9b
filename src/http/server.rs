//! Keep-alive HTTP 服务器 - 使用 Axum 提供存活、健康和指标端点

use std::future::Future;
use std::sync::Arc;
use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::http::routes;
use crate::infra::MemoryAnalyticsStore;
use crate::presence::PresenceRegistry;
use crate::security::PaymentGate;

/// HTTP 服务器共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub registry: Arc<PresenceRegistry>,
    pub gate: Arc<PaymentGate>,
    pub analytics: Arc<MemoryAnalyticsStore>,
    pub started_at: DateTime<Utc>,
}

impl HttpServerState {
    pub fn new(
        registry: Arc<PresenceRegistry>,
        gate: Arc<PaymentGate>,
        analytics: Arc<MemoryAnalyticsStore>,
    ) -> Self {
        Self {
            registry,
            gate,
            analytics,
            started_at: Utc::now(),
        }
    }
}

/// 构建完整路由（测试中直接使用）
pub fn router(state: HttpServerState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Keep-alive HTTP 服务器
pub struct KeepAliveServer {
    state: HttpServerState,
    bind_address: String,
}

impl KeepAliveServer {
    pub fn new(state: HttpServerState, bind_address: String) -> Self {
        Self { state, bind_address }
    }

    /// 运行直到 `shutdown` 完成
    pub async fn serve<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.state);
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!("🌐 Keep-alive server started on {}", self.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("🌐 Keep-alive server stopped");
        Ok(())
    }
}
