use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{error_response, unauthorized};
use crate::server::AppState;

/// `limit` values beyond this are clamped.
const MAX_AUDIT_LIMIT: u32 = 500;

/// `GET /__status`: configured services plus the live grant view.
pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let state = state.0;
    if !state.agent_key_ok(&headers) {
        return unauthorized();
    }

    let now = chrono::Utc::now();
    let mut approvals = Map::new();
    for grant in state.coordinator.live_grants() {
        approvals.insert(
            grant.service.clone(),
            json!({
                "expiresAt": grant.expires_at.to_rfc3339(),
                "approvedBy": grant.approved_by,
                "remainingMinutes": grant.remaining_minutes(now),
            }),
        );
    }

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "services": state.services.names(),
        "approvals": Value::Object(approvals),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u32>,
}

/// `GET /__audit`: most recent audit records, newest first.
pub async fn audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
    headers: HeaderMap,
) -> Response {
    let state = state.0;
    if !state.agent_key_ok(&headers) {
        return unauthorized();
    }

    let limit = query.limit.unwrap_or(50).min(MAX_AUDIT_LIMIT);
    match state.store.recent_requests(limit).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => {
            warn!(%err, "audit listing failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
