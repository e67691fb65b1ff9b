//! 存活与健康路由
//!
//! 路由：GET /、GET /ping、GET /health、GET /api/stats

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::http::HttpServerState;

/// 创建存活与健康路由
pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/", get(home))
        .route("/ping", get(ping))
        .route("/health", get(health))
        .route("/api/stats", get(stats))
}

async fn home() -> Json<Value> {
    Json(json!({
        "status": "UPI Bot is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn ping() -> &'static str {
    "pong"
}

/// 每个语音目标的在线状态；没有任何健康目标时返回 503
async fn health(State(state): State<HttpServerState>) -> Response {
    let targets = state.registry.snapshot();
    let healthy = state.registry.any_healthy();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "healthy": healthy,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "targets": targets,
    });

    (status, Json(body)).into_response()
}

async fn stats(State(state): State<HttpServerState>) -> Json<Value> {
    Json(json!({
        "analytics": state.analytics.summary(),
        "tracked_identities": state.gate.guard().tracked_identities(),
        "presence": state.registry.snapshot(),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::http::{router, HttpServerState};
    use crate::infra::{EventBus, MemoryAnalyticsStore};
    use crate::model::VoiceTarget;
    use crate::presence::{OrchestratorConfig, PresenceRegistry, SimulatedVoiceConnector};
    use crate::security::{
        AntiSpamGuard, PaymentGate, RateLimitConfig, SlidingWindowLimiter, SpamGuardConfig,
    };
    use super::*;

    fn state() -> HttpServerState {
        let registry = Arc::new(PresenceRegistry::new(
            Arc::new(SimulatedVoiceConnector::reliable()),
            OrchestratorConfig::default(),
            Arc::new(EventBus::new()),
        ));
        registry.register(VoiceTarget(100)).unwrap();

        let analytics = Arc::new(MemoryAnalyticsStore::new());
        let guard = Arc::new(AntiSpamGuard::new(
            SlidingWindowLimiter::new(RateLimitConfig::default()),
            SpamGuardConfig::default(),
        ));
        let gate = Arc::new(PaymentGate::new(guard, analytics.clone()));
        HttpServerState::new(registry, gate, analytics)
    }

    async fn get(state: HttpServerState, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_ping() {
        let (status, body) = get(state(), "/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"pong");
    }

    #[tokio::test]
    async fn test_home_reports_running() {
        let (status, body) = get(state(), "/").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "UPI Bot is running");
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_follows_presence() {
        let state = state();

        let (status, _) = get(state.clone(), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.registry.start_all().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (status, body) = get(state.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["targets"][0]["state"], "connected");

        state.registry.stop_all().await;
    }
}
