use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::schema::ServiceDefinition;

/// Structural problems in a service definition, reported at config load and
/// on every override write. The host-level security checks (allowlist,
/// private addresses) live in the guard crate and run separately.
#[derive(Debug, Error)]
pub enum PolicyConfigError {
    #[error("service name must not be empty")]
    EmptyName,

    #[error("duplicate service name: '{0}'")]
    DuplicateName(String),

    #[error("service name '{0}' is reserved (names may not start with '__' or contain '/')")]
    ReservedName(String),

    #[error("service '{name}' has an invalid upstream URL: {source}")]
    InvalidUpstream {
        name: String,
        source: url::ParseError,
    },

    #[error("service '{name}' upstream '{upstream}' has no host")]
    UpstreamWithoutHost { name: String, upstream: String },

    #[error("service '{name}' upstream scheme '{scheme}' is not http(s)")]
    UpstreamScheme { name: String, scheme: String },
}

/// Validate one definition's structure.
pub fn validate_definition(def: &ServiceDefinition) -> Result<(), PolicyConfigError> {
    if def.name.is_empty() {
        return Err(PolicyConfigError::EmptyName);
    }
    if def.name.starts_with("__") || def.name.contains('/') {
        return Err(PolicyConfigError::ReservedName(def.name.clone()));
    }
    let url = Url::parse(&def.upstream).map_err(|source| PolicyConfigError::InvalidUpstream {
        name: def.name.clone(),
        source,
    })?;
    if url.host_str().is_none() {
        return Err(PolicyConfigError::UpstreamWithoutHost {
            name: def.name.clone(),
            upstream: def.upstream.clone(),
        });
    }
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PolicyConfigError::UpstreamScheme {
            name: def.name.clone(),
            scheme: url.scheme().to_string(),
        });
    }
    Ok(())
}

/// Validate a full service list: every definition individually plus name
/// uniqueness across the set.
pub fn validate_services(defs: &[ServiceDefinition]) -> Result<(), PolicyConfigError> {
    let mut seen = HashSet::new();
    for def in defs {
        validate_definition(def)?;
        if !seen.insert(def.name.as_str()) {
            return Err(PolicyConfigError::DuplicateName(def.name.clone()));
        }
    }
    Ok(())
}
