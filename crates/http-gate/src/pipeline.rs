use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::Response;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

use audit_store::{AuditStore, NewRequest};
use gate_policy::ServiceDefinition;
use route_guard::{check_redirect, pin_host, validate_upstream};

use crate::capture::{truncate_payload, CaptureResult, CaptureStream};
use crate::error::{
    error_response, unauthorized, unknown_host, unknown_service, upstream_error, ERR_APPROVAL,
    ERR_REDIRECT, ERR_SECURITY_POLICY,
};
use crate::headers::{inject_credential, shape_headers};
use crate::routing::{build_upstream_url, resolve_route, RouteOutcome};
use crate::server::AppState;

/// Entry point for everything that is not an introspection or admin route.
///
/// The identity check runs inline; the rest of the pipeline runs in a
/// spawned task so that a client disconnect cannot cancel an approval wait
/// or suppress the audit row.
pub async fn proxy_request(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    if !state.0.agent_key_ok(req.headers()) {
        return unauthorized();
    }
    let agent_ip = addr.ip().to_string();

    match tokio::spawn(run_pipeline(state, agent_ip, req)).await {
        Ok(response) => response,
        Err(err) => {
            error!(%err, "request pipeline panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn run_pipeline(state: AppState, agent_ip: String, req: Request) -> Response {
    let state = state.0;
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok());

    // 1. Routing.
    let (def, upstream_path) = match resolve_route(&state.services, &target, host) {
        RouteOutcome::Matched { def, upstream_path } => (def, upstream_path),
        RouteOutcome::UnknownService(name) => {
            debug!(%name, "no such service");
            return unknown_service(&name);
        }
        RouteOutcome::UnknownHost => {
            debug!(host = host.unwrap_or("<none>"), "no intercept match");
            return unknown_host();
        }
    };

    // 2. Upstream URL construction plus the SSRF guard.
    let base = match def.upstream_url() {
        Ok(base) => base,
        Err(err) => {
            warn!(service = %def.name, %err, "unparseable upstream base");
            return security_denied(&state.store, &def, &method, &upstream_path, &agent_ip).await;
        }
    };
    let mut upstream_url = match build_upstream_url(&def, &upstream_path) {
        Ok(url) => url,
        Err(err) => {
            warn!(service = %def.name, %err, "upstream URL construction failed");
            return security_denied(&state.store, &def, &method, &upstream_path, &agent_ip).await;
        }
    };
    if let Err(err) = pin_host(&upstream_url, &base) {
        warn!(service = %def.name, %err, "host pin rejected request");
        return security_denied(&state.store, &def, &method, &upstream_path, &agent_ip).await;
    }
    if let Err(err) = validate_upstream(&state.guard, &upstream_url) {
        warn!(service = %def.name, %err, "upstream failed security policy");
        return security_denied(&state.store, &def, &method, &upstream_path, &agent_ip).await;
    }

    // 3. Buffer the inbound body (the framing-layer size cap).
    let body_bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };
    let request_capture = if state.capture.enabled && !body_bytes.is_empty() {
        Some(truncate_payload(
            &body_bytes,
            state.capture.max_bytes,
            Some(body_bytes.len() as u64),
        ))
    } else {
        None
    };

    // 4. Approval. Suspends until a decision or the pipeline deadline.
    let approved = state
        .coordinator
        .check(&def, method.as_str(), &upstream_path, &agent_ip)
        .await;
    if !approved {
        write_audit(
            &state.store,
            NewRequest {
                service: def.name.clone(),
                method: method.to_string(),
                path: upstream_path.clone(),
                approved: false,
                response_status: Some(403),
                agent_ip,
                request_body: request_capture,
                response_body: None,
            },
        )
        .await;
        return error_response(StatusCode::FORBIDDEN, ERR_APPROVAL);
    }

    // 5. Header shaping, then credential injection.
    let mut upstream_headers = shape_headers(&parts.headers, &upstream_url);
    inject_credential(&mut upstream_headers, &mut upstream_url, &def.credential);

    // 6. Forward.
    let upstream_resp = match state
        .client
        .request(method.clone(), upstream_url.clone())
        .headers(upstream_headers)
        .body(body_bytes.to_vec())
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            warn!(service = %def.name, %err, "upstream transport failure");
            let message = err.to_string();
            write_audit(
                &state.store,
                NewRequest {
                    service: def.name.clone(),
                    method: method.to_string(),
                    path: upstream_path.clone(),
                    approved: true,
                    response_status: Some(502),
                    agent_ip,
                    request_body: request_capture,
                    response_body: None,
                },
            )
            .await;
            return upstream_error(&message);
        }
    };

    // 7. Redirects are not chased; the first Location is re-validated and
    //    the 3xx either passes through untouched or dies here.
    let status = upstream_resp.status();
    if status.is_redirection() {
        if let Some(location) = upstream_resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            let blocked = match upstream_url.join(location) {
                Ok(resolved) => check_redirect(&state.guard, &resolved, &upstream_url).is_err(),
                Err(_) => true,
            };
            if blocked {
                warn!(service = %def.name, location, "upstream redirect blocked");
                write_audit(
                    &state.store,
                    NewRequest {
                        service: def.name.clone(),
                        method: method.to_string(),
                        path: upstream_path.clone(),
                        // The approval was spent even though the redirect died.
                        approved: true,
                        response_status: Some(403),
                        agent_ip,
                        request_body: request_capture,
                        response_body: None,
                    },
                )
                .await;
                return error_response(StatusCode::FORBIDDEN, ERR_REDIRECT);
            }
        }
    }

    info!(
        service = %def.name,
        method = %method,
        path = %upstream_path,
        status = status.as_u16(),
        "forwarded"
    );

    stream_response(
        &state.store,
        state.capture.enabled,
        state.capture.max_bytes,
        upstream_resp,
        def,
        method.to_string(),
        upstream_path,
        agent_ip,
        request_capture,
    )
}

/// Build the client-facing response around a tee of the upstream body. The
/// audit row is written by the tee's completion callback, strictly after the
/// body finished streaming (or the failure was decided).
#[allow(clippy::too_many_arguments)]
fn stream_response(
    store: &AuditStore,
    capture_enabled: bool,
    capture_cap: usize,
    upstream_resp: reqwest::Response,
    def: std::sync::Arc<ServiceDefinition>,
    method: String,
    upstream_path: String,
    agent_ip: String,
    request_capture: Option<String>,
) -> Response {
    let status = upstream_resp.status();
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_resp.headers() {
        // The body is re-framed by this server; everything else is passed
        // through as received.
        if name != "transfer-encoding" && name != "connection" {
            builder = builder.header(name.clone(), value.clone());
        }
    }

    let store = store.clone();
    let on_complete = move |result: CaptureResult| {
        let response_body = if capture_enabled && result.total > 0 {
            Some(truncate_payload(
                &result.captured,
                capture_cap,
                result.completed.then_some(result.total),
            ))
        } else {
            None
        };
        let record = NewRequest {
            service: def.name.clone(),
            method,
            path: upstream_path,
            approved: true,
            response_status: Some(status.as_u16()),
            agent_ip,
            request_body: request_capture,
            response_body,
        };
        tokio::spawn(async move {
            if let Err(err) = store.record_request(record).await {
                warn!(%err, "audit write failed; response already streamed");
            }
        });
    };

    let cap = if capture_enabled { capture_cap } else { 0 };
    let tee = CaptureStream::new(upstream_resp.bytes_stream(), cap, on_complete);
    match builder.body(Body::from_stream(tee)) {
        Ok(response) => response,
        Err(err) => {
            error!(%err, "failed to assemble response");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// Terminal outcome for SSRF/host-pin failures: one audit row, one 403.
async fn security_denied(
    store: &AuditStore,
    def: &ServiceDefinition,
    method: &axum::http::Method,
    upstream_path: &str,
    agent_ip: &str,
) -> Response {
    write_audit(
        store,
        NewRequest {
            service: def.name.clone(),
            method: method.to_string(),
            path: upstream_path.to_string(),
            approved: false,
            response_status: Some(403),
            agent_ip: agent_ip.to_string(),
            request_body: None,
            response_body: None,
        },
    )
    .await;
    error_response(StatusCode::FORBIDDEN, ERR_SECURITY_POLICY)
}

/// The response is authoritative; a failed audit write is logged and
/// swallowed.
async fn write_audit(store: &AuditStore, record: NewRequest) {
    if let Err(err) = store.record_request(record).await {
        warn!(%err, "audit write failed; continuing");
    }
}
