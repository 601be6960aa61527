use serde::{Deserialize, Serialize};
use url::Url;

/// One routing target: a named upstream with its credential recipe and
/// access policy. Deserialized from the bootstrap config and from the
/// service-override table, so the shape must round-trip through JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Unique name; doubles as the first path segment in path-prefix routing.
    pub name: String,
    /// Upstream base URL. The per-request path is appended to its path.
    pub upstream: String,
    /// Hostnames routed to this service in host-header mode.
    #[serde(default)]
    pub intercept_hosts: Vec<String>,
    /// How the real credential is attached to the outbound request.
    pub credential: CredentialRecipe,
    /// Ordered rules plus the default action.
    #[serde(default)]
    pub policy: ServicePolicy,
}

impl ServiceDefinition {
    /// Parse the upstream base URL. Definitions are validated at install
    /// time, so this only fails for a definition that bypassed the loader.
    pub fn upstream_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.upstream)
    }

    /// Copy of this definition with the credential secret replaced by
    /// `***`, for read-side surfaces.
    pub fn masked(&self) -> Self {
        let mut out = self.clone();
        out.credential = match &out.credential {
            CredentialRecipe::Bearer { .. } => CredentialRecipe::Bearer {
                token: "***".to_string(),
            },
            CredentialRecipe::Header { name, .. } => CredentialRecipe::Header {
                name: name.clone(),
                value: "***".to_string(),
            },
            CredentialRecipe::Query { name, .. } => CredentialRecipe::Query {
                name: name.clone(),
                value: "***".to_string(),
            },
        };
        out
    }
}

/// The three supported credential-injection shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRecipe {
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// A custom named header set to the given value.
    Header { name: String, value: String },
    /// A query parameter appended to the upstream URL; an existing parameter
    /// of the same name is replaced.
    Query { name: String, value: String },
}

/// Per-service policy: ordered rules, first match wins, fall through to the
/// default action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePolicy {
    #[serde(default = "default_action")]
    pub default_action: PolicyAction,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            default_action: default_action(),
            rules: Vec::new(),
        }
    }
}

fn default_action() -> PolicyAction {
    PolicyAction::RequireApproval
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    /// Forward without involving the approver.
    AutoApprove,
    /// Forward only under a live grant or a fresh human decision.
    RequireApproval,
}

/// A single rule. Both predicates are optional; an omitted predicate
/// matches everything, so a rule with neither is a catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// HTTP method, compared case-insensitively on equality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Prefix match on the upstream path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    pub action: PolicyAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_service() {
        let yaml = r#"
name: gh
upstream: "https://api.github.com"
credential:
  type: bearer
  token: "tok"
"#;
        let def: ServiceDefinition = serde_yml::from_str(yaml).unwrap();
        assert_eq!(def.name, "gh");
        assert!(def.intercept_hosts.is_empty());
        assert_eq!(def.policy.default_action, PolicyAction::RequireApproval);
        assert!(def.policy.rules.is_empty());
        assert!(matches!(def.credential, CredentialRecipe::Bearer { .. }));
    }

    #[test]
    fn deserialize_full_service() {
        let yaml = r#"
name: slack
upstream: "https://slack.com/api"
intercept_hosts:
  - "slack.com"
  - "api.slack.com"
credential:
  type: header
  name: "X-Api-Token"
  value: "tok"
policy:
  default_action: require_approval
  rules:
    - method: GET
      action: auto_approve
    - path_prefix: "/api/chat.postMessage"
      action: require_approval
"#;
        let def: ServiceDefinition = serde_yml::from_str(yaml).unwrap();
        assert_eq!(def.intercept_hosts.len(), 2);
        assert_eq!(def.policy.rules.len(), 2);
        assert_eq!(def.policy.rules[0].method.as_deref(), Some("GET"));
        assert_eq!(def.policy.rules[0].action, PolicyAction::AutoApprove);
        assert_eq!(
            def.policy.rules[1].path_prefix.as_deref(),
            Some("/api/chat.postMessage")
        );
    }

    #[test]
    fn definition_round_trips_through_json() {
        let yaml = r#"
name: gh
upstream: "https://api.github.com"
credential:
  type: query
  name: key
  value: "tok"
policy:
  default_action: auto_approve
"#;
        let def: ServiceDefinition = serde_yml::from_str(yaml).unwrap();
        let json = serde_json::to_string(&def).unwrap();
        let back: ServiceDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, def.name);
        assert_eq!(back.upstream, def.upstream);
        assert_eq!(back.policy.default_action, PolicyAction::AutoApprove);
        match back.credential {
            CredentialRecipe::Query { name, value } => {
                assert_eq!(name, "key");
                assert_eq!(value, "tok");
            }
            other => panic!("expected query recipe, got {other:?}"),
        }
    }

    #[test]
    fn masked_hides_every_recipe_secret() {
        let bearer = ServiceDefinition {
            name: "a".into(),
            upstream: "https://a.example".into(),
            intercept_hosts: vec![],
            credential: CredentialRecipe::Bearer {
                token: "secret".into(),
            },
            policy: ServicePolicy::default(),
        };
        match bearer.masked().credential {
            CredentialRecipe::Bearer { token } => assert_eq!(token, "***"),
            other => panic!("unexpected recipe {other:?}"),
        }

        let header = ServiceDefinition {
            credential: CredentialRecipe::Header {
                name: "X-Key".into(),
                value: "secret".into(),
            },
            ..bearer.clone()
        };
        match header.masked().credential {
            CredentialRecipe::Header { name, value } => {
                assert_eq!(name, "X-Key");
                assert_eq!(value, "***");
            }
            other => panic!("unexpected recipe {other:?}"),
        }
    }
}
