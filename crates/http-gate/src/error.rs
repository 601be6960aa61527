use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// The fixed error strings the agent-facing surface returns. Clients match
/// on them, so they are constants rather than formatted ad hoc.
pub const ERR_BAD_AGENT_KEY: &str = "Invalid or missing X-ClawGuard-Key";
pub const ERR_SECURITY_POLICY: &str = "Request blocked by security policy";
pub const ERR_APPROVAL: &str = "Approval denied or timed out";
pub const ERR_REDIRECT: &str = "Redirect blocked by security policy";

/// A machine-readable error body: `{"error": "<message>"}`.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, ERR_BAD_AGENT_KEY)
}

pub fn unknown_service(name: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Unknown service: {name}"),
    )
}

pub fn unknown_host() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "Unknown host. Configure intercept_hosts on a service to proxy by Host header.",
    )
}

pub fn upstream_error(message: &str) -> Response {
    error_response(
        StatusCode::BAD_GATEWAY,
        format!("Upstream error: {message}"),
    )
}
