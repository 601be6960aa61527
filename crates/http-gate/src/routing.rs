use std::sync::Arc;

use url::Url;

use gate_policy::{ServiceDefinition, ServiceTable};

/// Where a request target landed after both routing strategies ran.
pub enum RouteOutcome {
    /// A service matched; `upstream_path` is what gets appended to its base
    /// URL (path plus query, always starting with `/` or `?`).
    Matched {
        def: Arc<ServiceDefinition>,
        upstream_path: String,
    },
    /// The first path segment named no configured service.
    UnknownService(String),
    /// No path match and the Host header matched no intercept hostname.
    UnknownHost,
}

/// Resolve a request target against the live table.
///
/// Path-prefix mode wins: the first path segment names the service and the
/// remainder of the target becomes the upstream path (`/` when empty).
/// Otherwise the Host header (port stripped) is tried against each service's
/// intercept hostnames in declared order, and the whole target becomes the
/// upstream path. Targets under the reserved `__` prefix never match a
/// service.
pub fn resolve_route(table: &ServiceTable, target: &str, host: Option<&str>) -> RouteOutcome {
    let first_segment = first_path_segment(target);

    if let Some(segment) = first_segment {
        if let Some(def) = table.get(segment) {
            let remainder = &target[1 + segment.len()..];
            let upstream_path = if remainder.is_empty() {
                "/".to_string()
            } else {
                remainder.to_string()
            };
            return RouteOutcome::Matched { def, upstream_path };
        }
    }

    if let Some(host) = host {
        let host = strip_port(host);
        if let Some(def) = table.match_host(host) {
            return RouteOutcome::Matched {
                def,
                upstream_path: target.to_string(),
            };
        }
    }

    match first_segment {
        Some(segment) => RouteOutcome::UnknownService(segment.to_string()),
        None => RouteOutcome::UnknownHost,
    }
}

/// The first path segment of a request target, unless it is empty or
/// reserved.
fn first_path_segment(target: &str) -> Option<&str> {
    let rest = target.strip_prefix('/')?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let segment = &rest[..end];
    if segment.is_empty() || segment.starts_with("__") {
        None
    } else {
        Some(segment)
    }
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 keeps its brackets; only a trailing :port is dropped.
    if let Some(end) = host.rfind(']') {
        return &host[..=end];
    }
    host.split(':').next().unwrap_or(host)
}

/// Build the upstream URL by appending the upstream path to the service's
/// base URL. The base's own path is kept as a prefix, so base
/// `https://u.example/api` plus `/x/y?z=1` yields
/// `https://u.example/api/x/y?z=1`.
pub fn build_upstream_url(
    def: &ServiceDefinition,
    upstream_path: &str,
) -> Result<Url, url::ParseError> {
    let base = def.upstream_url()?;
    let mut full = format!(
        "{}://{}",
        base.scheme(),
        base.host_str().unwrap_or_default()
    );
    if let Some(port) = base.port() {
        full.push_str(&format!(":{port}"));
    }
    full.push_str(base.path().trim_end_matches('/'));
    let rest = if upstream_path.is_empty() {
        "/"
    } else {
        upstream_path
    };
    if !rest.starts_with('/') && !rest.starts_with('?') {
        full.push('/');
    }
    full.push_str(rest);
    Url::parse(&full)
}
