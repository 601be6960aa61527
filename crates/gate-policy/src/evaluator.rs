use tracing::trace;

use crate::schema::{PolicyAction, PolicyRule, ServicePolicy};

/// Resolve the action for one request against a service's policy.
///
/// Rules are walked in declared order and the first rule whose predicates
/// all match wins. A rule's method predicate matches case-insensitively on
/// equality; its path predicate matches by prefix on the upstream path. When
/// no rule matches, the service default applies.
pub fn resolve_action(policy: &ServicePolicy, method: &str, path: &str) -> PolicyAction {
    for rule in &policy.rules {
        if rule_matches(rule, method, path) {
            trace!(?rule.action, method, path, "policy rule matched");
            return rule.action;
        }
    }
    policy.default_action
}

fn rule_matches(rule: &PolicyRule, method: &str, path: &str) -> bool {
    if let Some(m) = &rule.method {
        if !m.eq_ignore_ascii_case(method) {
            return false;
        }
    }
    if let Some(prefix) = &rule.path_prefix {
        if !path.starts_with(prefix.as_str()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(method: Option<&str>, prefix: Option<&str>, action: PolicyAction) -> PolicyRule {
        PolicyRule {
            method: method.map(str::to_string),
            path_prefix: prefix.map(str::to_string),
            action,
        }
    }

    #[test]
    fn empty_rules_fall_through_to_default() {
        let policy = ServicePolicy {
            default_action: PolicyAction::RequireApproval,
            rules: vec![],
        };
        assert_eq!(
            resolve_action(&policy, "GET", "/user"),
            PolicyAction::RequireApproval
        );
    }

    #[test]
    fn method_matches_case_insensitively() {
        let policy = ServicePolicy {
            default_action: PolicyAction::RequireApproval,
            rules: vec![rule(Some("get"), None, PolicyAction::AutoApprove)],
        };
        assert_eq!(
            resolve_action(&policy, "GET", "/anything"),
            PolicyAction::AutoApprove
        );
        assert_eq!(
            resolve_action(&policy, "POST", "/anything"),
            PolicyAction::RequireApproval
        );
    }

    #[test]
    fn path_prefix_matches() {
        let policy = ServicePolicy {
            default_action: PolicyAction::AutoApprove,
            rules: vec![rule(
                None,
                Some("/repos/"),
                PolicyAction::RequireApproval,
            )],
        };
        assert_eq!(
            resolve_action(&policy, "GET", "/repos/a/b"),
            PolicyAction::RequireApproval
        );
        assert_eq!(
            resolve_action(&policy, "GET", "/user"),
            PolicyAction::AutoApprove
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let policy = ServicePolicy {
            default_action: PolicyAction::RequireApproval,
            rules: vec![
                rule(Some("GET"), None, PolicyAction::AutoApprove),
                rule(None, Some("/user"), PolicyAction::RequireApproval),
            ],
        };
        // Both rules match GET /user; the earlier one decides.
        assert_eq!(
            resolve_action(&policy, "GET", "/user"),
            PolicyAction::AutoApprove
        );
    }

    #[test]
    fn both_predicates_must_match() {
        let policy = ServicePolicy {
            default_action: PolicyAction::RequireApproval,
            rules: vec![rule(
                Some("DELETE"),
                Some("/repos/"),
                PolicyAction::AutoApprove,
            )],
        };
        assert_eq!(
            resolve_action(&policy, "DELETE", "/user"),
            PolicyAction::RequireApproval
        );
        assert_eq!(
            resolve_action(&policy, "GET", "/repos/a"),
            PolicyAction::RequireApproval
        );
        assert_eq!(
            resolve_action(&policy, "DELETE", "/repos/a"),
            PolicyAction::AutoApprove
        );
    }

    #[test]
    fn predicate_free_rule_is_catch_all() {
        let policy = ServicePolicy {
            default_action: PolicyAction::RequireApproval,
            rules: vec![rule(None, None, PolicyAction::AutoApprove)],
        };
        assert_eq!(
            resolve_action(&policy, "PATCH", "/whatever"),
            PolicyAction::AutoApprove
        );
    }
}
