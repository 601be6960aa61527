use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Reasons a destination fails validation.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("scheme '{0}' is not allowed; upstream requests must use http or https")]
    SchemeNotAllowed(String),

    #[error("host '{0}' is not in the upstream allowlist")]
    HostNotAllowed(String),

    #[error("host '{0}' is a private or reserved address")]
    PrivateAddress(String),

    #[error(
        "constructed URL points at '{got}' instead of the configured upstream host '{expected}'"
    )]
    HostPinViolation { expected: String, got: String },

    #[error("URL has no host component")]
    MissingHost,
}

/// The loaded security policy evaluated against every upstream destination.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    /// Hostnames upstream requests may target. An empty list allows every
    /// host (back-compat with configs written before the allowlist existed).
    pub allowed_upstream_hosts: Vec<String>,
    /// Whether literal private/reserved addresses are rejected.
    pub block_private_ips: bool,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            allowed_upstream_hosts: Vec::new(),
            block_private_ips: true,
        }
    }
}

/// Check a hostname against the allowlist.
///
/// A hostname passes when the allowlist is empty, when it equals an entry,
/// or when it is a subdomain of an entry. Subdomain matching is suffix-based
/// after a dot: entry `example.com` admits `api.example.com` but not
/// `evilexample.com`.
pub fn host_allowed(policy: &GuardPolicy, host: &str) -> bool {
    if policy.allowed_upstream_hosts.is_empty() {
        return true;
    }
    let host = host.to_ascii_lowercase();
    policy.allowed_upstream_hosts.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        host == entry || host.ends_with(&format!(".{entry}"))
    })
}

/// Whether a host literal falls in a private or reserved range.
///
/// Only literal addresses are examined; a hostname that merely *resolves* to
/// a private address passes here (see [`resolves_privately`] for the
/// advisory DNS check).
pub fn is_private_host(host: &str) -> bool {
    let literal = strip_brackets(host);
    match literal.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_private_v4(v4),
        Ok(IpAddr::V6(v6)) => is_private_v6(v6),
        Err(_) => false,
    }
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    let o = addr.octets();
    o[0] == 127
        || o[0] == 10
        || o[0] == 0
        || (o[0] == 172 && (16..=31).contains(&o[1]))
        || (o[0] == 192 && o[1] == 168)
        || (o[0] == 169 && o[1] == 254)
}

fn is_private_v6(addr: Ipv6Addr) -> bool {
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_private_v4(v4);
    }
    let seg0 = addr.segments()[0];
    addr == Ipv6Addr::LOCALHOST
        || (seg0 & 0xfe00) == 0xfc00 // fc00::/7 unique-local
        || (seg0 & 0xffc0) == 0xfe80 // fe80::/10 link-local
}

/// Only plain HTTP(S) may leave the gateway.
pub fn scheme_allowed(scheme: &str) -> bool {
    matches!(scheme, "http" | "https")
}

/// Full validation of an upstream URL: scheme, allowlist, private-address
/// block. Used at config load, on override installs, and as part of the
/// redirect re-check.
pub fn validate_upstream(policy: &GuardPolicy, url: &Url) -> Result<(), GuardError> {
    if !scheme_allowed(url.scheme()) {
        return Err(GuardError::SchemeNotAllowed(url.scheme().to_string()));
    }
    let host = url.host_str().ok_or(GuardError::MissingHost)?;
    if !host_allowed(policy, host) {
        return Err(GuardError::HostNotAllowed(host.to_string()));
    }
    if policy.block_private_ips && is_private_host(host) {
        return Err(GuardError::PrivateAddress(host.to_string()));
    }
    Ok(())
}

/// Runtime host-pin: the constructed per-request URL must still point at the
/// configured upstream host, byte-exact, on the same scheme. Catches path
/// segments that a URL resolver folds into the authority and any scheme
/// switch.
pub fn pin_host(constructed: &Url, base: &Url) -> Result<(), GuardError> {
    let expected = base.host_str().ok_or(GuardError::MissingHost)?;
    let got = constructed.host_str().ok_or(GuardError::MissingHost)?;
    if got != expected || constructed.scheme() != base.scheme() {
        return Err(GuardError::HostPinViolation {
            expected: expected.to_string(),
            got: got.to_string(),
        });
    }
    Ok(())
}

/// Re-validate a redirect target: the `Location` value resolved against the
/// current upstream URL must stay pinned to the upstream host and still pass
/// the allowlist and private-address rules.
pub fn check_redirect(
    policy: &GuardPolicy,
    location: &Url,
    base: &Url,
) -> Result<(), GuardError> {
    pin_host(location, base)?;
    validate_upstream(policy, location)
}

/// Advisory DNS check: resolve the hostname and report whether any address
/// is private. Never used to block a request on its own; callers log the
/// outcome.
pub async fn resolves_privately(host: &str) -> bool {
    // Port is irrelevant to resolution but lookup_host requires one.
    match tokio::net::lookup_host((host, 443)).await {
        Ok(addrs) => {
            for addr in addrs {
                let private = match addr.ip() {
                    IpAddr::V4(v4) => is_private_v4(v4),
                    IpAddr::V6(v6) => is_private_v6(v6),
                };
                if private {
                    warn!(host, resolved = %addr.ip(), "upstream resolves to a private address");
                    return true;
                }
            }
            false
        }
        Err(err) => {
            debug!(host, %err, "DNS lookup failed during advisory check");
            false
        }
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(hosts: &[&str]) -> GuardPolicy {
        GuardPolicy {
            allowed_upstream_hosts: hosts.iter().map(|s| s.to_string()).collect(),
            block_private_ips: true,
        }
    }

    #[test]
    fn empty_allowlist_allows_everything() {
        let p = policy(&[]);
        assert!(host_allowed(&p, "api.github.com"));
        assert!(host_allowed(&p, "anything.example"));
    }

    #[test]
    fn exact_host_matches() {
        let p = policy(&["api.github.com"]);
        assert!(host_allowed(&p, "api.github.com"));
        assert!(!host_allowed(&p, "github.com"));
    }

    #[test]
    fn subdomain_matches_after_dot_only() {
        let p = policy(&["example.com"]);
        assert!(host_allowed(&p, "example.com"));
        assert!(host_allowed(&p, "api.example.com"));
        assert!(host_allowed(&p, "deep.api.example.com"));
        assert!(!host_allowed(&p, "evilexample.com"));
    }

    #[test]
    fn host_matching_is_case_insensitive() {
        let p = policy(&["Example.COM"]);
        assert!(host_allowed(&p, "api.example.com"));
        assert!(host_allowed(&p, "EXAMPLE.com"));
    }

    #[test]
    fn private_v4_ranges_detected() {
        for host in [
            "127.0.0.1",
            "127.255.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.0.5",
            "0.0.0.0",
        ] {
            assert!(is_private_host(host), "{host} should be private");
        }
    }

    #[test]
    fn public_v4_passes() {
        for host in ["8.8.8.8", "172.15.0.1", "172.32.0.1", "192.169.0.1"] {
            assert!(!is_private_host(host), "{host} should be public");
        }
    }

    #[test]
    fn private_v6_ranges_detected() {
        for host in ["::1", "[::1]", "fc00::1", "fd12::1", "fe80::1", "febf::1"] {
            assert!(is_private_host(host), "{host} should be private");
        }
        assert!(!is_private_host("2606:4700::1111"));
    }

    #[test]
    fn mapped_v4_checked_as_v4() {
        assert!(is_private_host("::ffff:10.0.0.1"));
        assert!(!is_private_host("::ffff:8.8.8.8"));
    }

    #[test]
    fn hostnames_are_not_address_literals() {
        assert!(!is_private_host("localhost"));
        assert!(!is_private_host("internal.corp"));
    }

    #[test]
    fn scheme_whitelist() {
        assert!(scheme_allowed("http"));
        assert!(scheme_allowed("https"));
        assert!(!scheme_allowed("ftp"));
        assert!(!scheme_allowed("file"));
        assert!(!scheme_allowed("gopher"));
    }

    #[test]
    fn validate_upstream_rejects_scheme() {
        let p = policy(&[]);
        let url = Url::parse("ftp://api.github.com/x").unwrap();
        assert!(matches!(
            validate_upstream(&p, &url),
            Err(GuardError::SchemeNotAllowed(_))
        ));
    }

    #[test]
    fn validate_upstream_rejects_unlisted_host() {
        let p = policy(&["api.github.com"]);
        let url = Url::parse("https://evil.example/x").unwrap();
        assert!(matches!(
            validate_upstream(&p, &url),
            Err(GuardError::HostNotAllowed(_))
        ));
    }

    #[test]
    fn validate_upstream_rejects_private_literal() {
        let p = policy(&[]);
        let url = Url::parse("http://169.254.169.254/latest/meta-data").unwrap();
        assert!(matches!(
            validate_upstream(&p, &url),
            Err(GuardError::PrivateAddress(_))
        ));
    }

    #[test]
    fn validate_upstream_accepts_allowlisted() {
        let p = policy(&["api.github.com"]);
        let url = Url::parse("https://api.github.com/user").unwrap();
        assert!(validate_upstream(&p, &url).is_ok());
    }

    #[test]
    fn pin_host_accepts_same_host() {
        let base = Url::parse("https://api.github.com/api").unwrap();
        let constructed = Url::parse("https://api.github.com/api/x/y?z=1").unwrap();
        assert!(pin_host(&constructed, &base).is_ok());
    }

    #[test]
    fn pin_host_rejects_swapped_host() {
        let base = Url::parse("https://api.github.com").unwrap();
        let constructed = Url::parse("https://evil.example/x").unwrap();
        let err = pin_host(&constructed, &base).unwrap_err();
        assert!(matches!(err, GuardError::HostPinViolation { .. }));
        assert!(err.to_string().contains("evil.example"));
    }

    #[test]
    fn pin_host_rejects_scheme_switch() {
        let base = Url::parse("https://api.github.com").unwrap();
        let constructed = Url::parse("http://api.github.com/x").unwrap();
        assert!(pin_host(&constructed, &base).is_err());
    }

    #[test]
    fn redirect_check_allows_same_host_target() {
        let p = policy(&["api.github.com"]);
        let base = Url::parse("https://api.github.com/repos").unwrap();
        let loc = Url::parse("https://api.github.com/repos/other").unwrap();
        assert!(check_redirect(&p, &loc, &base).is_ok());
    }

    #[test]
    fn redirect_check_blocks_offsite_target() {
        let p = policy(&["api.github.com"]);
        let base = Url::parse("https://api.github.com/repos").unwrap();
        let loc = Url::parse("https://attacker.example/").unwrap();
        assert!(check_redirect(&p, &loc, &base).is_err());
    }

    #[test]
    fn redirect_check_blocks_private_target() {
        let p = policy(&[]);
        let base = Url::parse("http://192.168.0.10/x").unwrap();
        let loc = Url::parse("http://192.168.0.10/admin").unwrap();
        // Same host, so the pin passes, but the private-address rule fires.
        assert!(check_redirect(&p, &loc, &base).is_err());
    }
}
