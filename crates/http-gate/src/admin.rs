use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use gate_policy::{validate_definition, ServiceDefinition};
use route_guard::{client_ip_allowed, validate_upstream};

use crate::error::error_response;
use crate::server::AppState;

/// The admin surface: service overrides, grant revocation, and the
/// dashboard aggregates. Guarded by the IP allowlist plus the shared PIN
/// header, never by the agent key the untrusted agent holds.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/services", get(list_services))
        .route("/services/{name}", put(upsert_service).delete(delete_service))
        .route("/approvers", get(list_approvers))
        .route("/revoke/{service}", post(revoke_service))
        .route("/revoke-all", post(revoke_all))
        .route("/stats", get(stats))
}

const PIN_HEADER: &str = "x-admin-pin";

fn authorize(state: &AppState, addr: &SocketAddr, headers: &HeaderMap) -> Result<(), Response> {
    let state = &state.0;
    if !client_ip_allowed(&state.admin_ip_allowlist, &addr.ip().to_string()) {
        warn!(client = %addr.ip(), "admin request from disallowed address");
        return Err(error_response(StatusCode::FORBIDDEN, "Admin access denied"));
    }
    let presented = headers.get(PIN_HEADER).and_then(|v| v.to_str().ok());
    if state.admin_pin.is_empty() || presented != Some(state.admin_pin.as_str()) {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid or missing admin PIN",
        ));
    }
    Ok(())
}

async fn list_services(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&state, &addr, &headers) {
        return denied;
    }
    let state = state.0;

    let overridden: Vec<String> = match state.store.list_overrides().await {
        Ok(rows) => rows.into_iter().map(|r| r.service_name).collect(),
        Err(err) => {
            warn!(%err, "override listing failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };

    let services: Vec<_> = state
        .services
        .snapshot()
        .iter()
        .map(|def| {
            json!({
                "definition": def.masked(),
                "overridden": overridden.contains(&def.name),
            })
        })
        .collect();
    Json(json!({ "services": services })).into_response()
}

/// Install or replace a service override. The definition is re-validated,
/// structurally and by the security guard, before it is persisted and
/// swapped into the live table.
async fn upsert_service(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(mut definition): Json<ServiceDefinition>,
) -> Response {
    if let Err(denied) = authorize(&state, &addr, &headers) {
        return denied;
    }
    let state = state.0;
    definition.name = name;

    if let Err(err) = validate_definition(&definition) {
        return error_response(StatusCode::BAD_REQUEST, err.to_string());
    }
    let base = match definition.upstream_url() {
        Ok(base) => base,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    if let Err(err) = validate_upstream(&state.guard, &base) {
        warn!(service = %definition.name, %err, "override rejected by security policy");
        return error_response(StatusCode::FORBIDDEN, err.to_string());
    }

    let config_json = match serde_json::to_string(&definition) {
        Ok(json) => json,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    };
    if let Err(err) = state.store.upsert_override(&definition.name, &config_json).await {
        warn!(%err, "override not persisted");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
    }

    info!(service = %definition.name, "service override installed");
    let masked = definition.masked();
    state.services.upsert(definition);
    Json(json!({ "service": masked })).into_response()
}

/// Delete an override. A service that came from the bootstrap config reverts
/// to its configured definition; a purely override-defined service is
/// removed from the live table.
async fn delete_service(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&state, &addr, &headers) {
        return denied;
    }
    let state = state.0;

    let removed = match state.store.delete_override(&name).await {
        Ok(removed) => removed,
        Err(err) => {
            warn!(%err, "override delete failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };

    match state.bootstrap.iter().find(|d| d.name == name) {
        Some(configured) => {
            state.services.upsert(configured.clone());
            info!(service = %name, "override removed; configured definition restored");
        }
        None => {
            state.services.remove(&name);
            info!(service = %name, "override-defined service removed");
        }
    }

    Json(json!({ "service": name, "removed": removed })).into_response()
}

async fn list_approvers(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&state, &addr, &headers) {
        return denied;
    }
    match state.0.store.list_approvers().await {
        Ok(approvers) => Json(json!({ "approvers": approvers })).into_response(),
        Err(err) => {
            warn!(%err, "approver listing failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn revoke_service(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(service): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&state, &addr, &headers) {
        return denied;
    }
    let revoked = state.0.coordinator.revoke(&service).await;
    info!(service, revoked, "grant revocation requested");
    Json(json!({ "service": service, "revoked": revoked })).into_response()
}

async fn revoke_all(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&state, &addr, &headers) {
        return denied;
    }
    let revoked = state.0.coordinator.revoke_all().await;
    info!(revoked, "all grants revoked");
    Json(json!({ "revoked": revoked })).into_response()
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    hours: Option<i64>,
}

async fn stats(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<StatsQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&state, &addr, &headers) {
        return denied;
    }
    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 90);
    let since = chrono::Utc::now() - chrono::Duration::hours(hours);
    match state.0.store.dashboard_stats(since).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => {
            warn!(%err, "stats query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
