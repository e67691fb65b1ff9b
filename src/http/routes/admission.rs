//! 请求准入路由
//!
//! 路由：POST /api/admission

use axum::{
    extract::State,
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::Result;
use crate::http::HttpServerState;
use crate::model::{Identity, RequestEvent, RequestKind};

/// 创建准入路由
pub fn create_route() -> Router<HttpServerState> {
    Router::new().route("/api/admission", post(check_admission))
}

#[derive(Debug, Deserialize)]
struct AdmissionRequest {
    user_id: u64,
    kind: RequestKind,
}

/// 放行时返回 200，否则按 PresenceError 返回 429
async fn check_admission(
    State(state): State<HttpServerState>,
    Json(request): Json<AdmissionRequest>,
) -> Result<Json<Value>> {
    let event = RequestEvent::new(Identity::new(request.user_id), request.kind);
    let decision = state.gate.check(&event).await;
    debug!("🎫 Admission for user {} ({}): {:?}", event.identity, event.kind, decision);

    decision.into_result()?;

    Ok(Json(json!({
        "decision": "proceed",
        "user_id": request.user_id,
        "kind": request.kind,
    })))
}
