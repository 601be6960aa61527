use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;

use approval_flow::ApprovalCoordinator;
use audit_store::AuditStore;
use gate_policy::{ServiceDefinition, ServiceTable};
use route_guard::GuardPolicy;

use crate::headers::extract_agent_key;
use crate::{admin, introspect, pipeline};

/// Payload-capture settings for the audit log.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub max_bytes: usize,
}

/// Everything a request handler needs, shared behind one Arc.
pub struct GateState {
    pub agent_key: String,
    pub services: Arc<ServiceTable>,
    /// The definitions that came from the bootstrap config, kept so deleting
    /// an override can restore them.
    pub bootstrap: Vec<ServiceDefinition>,
    pub guard: GuardPolicy,
    pub coordinator: Arc<ApprovalCoordinator>,
    pub store: AuditStore,
    pub client: reqwest::Client,
    pub capture: CaptureConfig,
    pub admin_ip_allowlist: Vec<String>,
    pub admin_pin: String,
    pub max_body_bytes: usize,
}

impl GateState {
    pub fn agent_key_ok(&self, headers: &HeaderMap) -> bool {
        extract_agent_key(headers) == Some(self.agent_key.as_str())
    }

    /// The forwarding client: redirects stay with the gateway's re-check
    /// rather than being chased.
    pub fn upstream_client() -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()
    }
}

#[derive(Clone)]
pub struct AppState(pub Arc<GateState>);

/// Assemble the full agent-facing router: introspection, the admin nest,
/// and the proxy fallback that owns every other method and path.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/__status", get(introspect::status))
        .route("/__audit", get(introspect::audit))
        .nest("/__admin", admin::router())
        .fallback(pipeline::proxy_request)
        .with_state(state)
}
