use axum::http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, HOST};
use url::Url;

use gate_policy::CredentialRecipe;

/// Canonical agent-secret header.
pub const AGENT_KEY_HEADER: &str = "x-clawguard-key";
/// Legacy alias, accepted on input and stripped like everything else under
/// the vendor prefixes.
pub const LEGACY_AGENT_KEY_HEADER: &str = "x-agentgate-key";

const VENDOR_PREFIXES: [&str; 2] = ["x-clawguard-", "x-agentgate-"];

/// Pull the agent secret off a request, canonical header first, legacy alias
/// second.
pub fn extract_agent_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AGENT_KEY_HEADER)
        .or_else(|| headers.get(LEGACY_AGENT_KEY_HEADER))
        .and_then(|v| v.to_str().ok())
}

/// Whether a header must never reach the upstream: the agent secret under
/// either vendor prefix, the inbound Host, and the framing headers the
/// forwarding client recomputes.
fn is_internal_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name == "host"
        || name == "content-length"
        || name == "transfer-encoding"
        || name == "connection"
        || VENDOR_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Copy the inbound headers minus the gateway-internal ones, then point Host
/// at the upstream.
pub fn shape_headers(incoming: &HeaderMap, upstream: &Url) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in incoming {
        if !is_internal_header(name) {
            out.append(name.clone(), value.clone());
        }
    }
    let mut host = upstream.host_str().unwrap_or_default().to_string();
    if let Some(port) = upstream.port() {
        host.push_str(&format!(":{port}"));
    }
    if let Ok(value) = HeaderValue::from_str(&host) {
        out.insert(HOST, value);
    }
    out
}

/// Attach the service credential. Runs after stripping, so an agent-supplied
/// Authorization header is overwritten rather than merged. The query recipe
/// rewrites the URL instead, replacing any same-name parameter.
pub fn inject_credential(headers: &mut HeaderMap, url: &mut Url, recipe: &CredentialRecipe) {
    match recipe {
        CredentialRecipe::Bearer { token } => {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        CredentialRecipe::Header { name, value } => {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        CredentialRecipe::Query { name, value } => {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != name.as_str())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in kept {
                pairs.append_pair(&k, &v);
            }
            pairs.append_pair(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn canonical_key_preferred_over_legacy() {
        let map = headers(&[("x-clawguard-key", "K1"), ("x-agentgate-key", "K2")]);
        assert_eq!(extract_agent_key(&map), Some("K1"));
    }

    #[test]
    fn legacy_key_accepted_alone() {
        let map = headers(&[("x-agentgate-key", "K2")]);
        assert_eq!(extract_agent_key(&map), Some("K2"));
    }

    #[test]
    fn missing_key_is_none() {
        assert_eq!(extract_agent_key(&HeaderMap::new()), None);
    }

    #[test]
    fn shaping_strips_internal_and_rewrites_host() {
        let incoming = headers(&[
            ("x-clawguard-key", "K"),
            ("x-agentgate-key", "K"),
            ("x-clawguard-trace", "abc"),
            ("host", "gateway.local"),
            ("content-length", "12"),
            ("accept", "application/json"),
            ("user-agent", "agent/1.0"),
        ]);
        let upstream = Url::parse("https://api.github.com/user").unwrap();
        let shaped = shape_headers(&incoming, &upstream);

        assert!(shaped.get("x-clawguard-key").is_none());
        assert!(shaped.get("x-agentgate-key").is_none());
        assert!(shaped.get("x-clawguard-trace").is_none());
        assert!(shaped.get("content-length").is_none());
        assert_eq!(shaped.get(HOST).unwrap(), "api.github.com");
        assert_eq!(shaped.get("accept").unwrap(), "application/json");
        assert_eq!(shaped.get("user-agent").unwrap(), "agent/1.0");
    }

    #[test]
    fn host_keeps_explicit_port() {
        let upstream = Url::parse("http://127.0.0.1:9999/base").unwrap();
        let shaped = shape_headers(&HeaderMap::new(), &upstream);
        assert_eq!(shaped.get(HOST).unwrap(), "127.0.0.1:9999");
    }

    #[test]
    fn bearer_overwrites_agent_authorization() {
        let mut map = headers(&[("authorization", "Bearer agent-fake")]);
        let mut url = Url::parse("https://api.github.com/user").unwrap();
        inject_credential(
            &mut map,
            &mut url,
            &CredentialRecipe::Bearer {
                token: "real".to_string(),
            },
        );
        assert_eq!(map.get(AUTHORIZATION).unwrap(), "Bearer real");
    }

    #[test]
    fn named_header_recipe() {
        let mut map = HeaderMap::new();
        let mut url = Url::parse("https://a.example/").unwrap();
        inject_credential(
            &mut map,
            &mut url,
            &CredentialRecipe::Header {
                name: "X-Api-Token".to_string(),
                value: "real".to_string(),
            },
        );
        assert_eq!(map.get("x-api-token").unwrap(), "real");
    }

    #[test]
    fn query_recipe_appends() {
        let mut map = HeaderMap::new();
        let mut url = Url::parse("https://a.example/v1?x=1").unwrap();
        inject_credential(
            &mut map,
            &mut url,
            &CredentialRecipe::Query {
                name: "key".to_string(),
                value: "real".to_string(),
            },
        );
        assert_eq!(url.as_str(), "https://a.example/v1?x=1&key=real");
    }

    #[test]
    fn query_recipe_replaces_same_name_param() {
        let mut map = HeaderMap::new();
        let mut url = Url::parse("https://a.example/v1?key=fake&x=1").unwrap();
        inject_credential(
            &mut map,
            &mut url,
            &CredentialRecipe::Query {
                name: "key".to_string(),
                value: "real".to_string(),
            },
        );
        assert_eq!(url.as_str(), "https://a.example/v1?x=1&key=real");
    }
}
