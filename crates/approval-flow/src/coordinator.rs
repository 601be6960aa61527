use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use audit_store::{AuditStore, StoreError};
use gate_policy::{resolve_action, PolicyAction, ServiceDefinition};

use crate::grant::Grant;
use crate::pending::{ApprovalDecision, ApprovalPrompt, PendingRegistry};

/// Approver identity recorded when the pipeline deadline fired first.
pub const TIMEOUT_APPROVER: &str = "timeout";
/// Approver identity recorded when the prompt could not be delivered.
pub const SEND_FAILURE_APPROVER: &str = "telegram_error";
/// Approver identity recorded when an unpaired sender tried to decide.
pub const UNPAIRED_APPROVER: &str = "unpaired";

#[derive(Debug, Error)]
#[error("approval prompt could not be delivered: {0}")]
pub struct PromptError(pub String);

/// The seam to the out-of-band channel. The notifier implements this; tests
/// substitute a scripted prompter.
#[async_trait]
pub trait ApprovalPrompter: Send + Sync {
    async fn prompt(&self, prompt: &ApprovalPrompt) -> Result<(), PromptError>;
}

/// Owns the live grants map and the pending registry, and runs the
/// check/grant/revoke state machine.
pub struct ApprovalCoordinator {
    grants: Mutex<HashMap<String, Grant>>,
    pending: Arc<PendingRegistry>,
    prompter: Arc<dyn ApprovalPrompter>,
    store: AuditStore,
    deadline: Duration,
}

impl ApprovalCoordinator {
    pub fn new(
        pending: Arc<PendingRegistry>,
        prompter: Arc<dyn ApprovalPrompter>,
        store: AuditStore,
        deadline: Duration,
    ) -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            pending,
            prompter,
            store,
            deadline,
        }
    }

    /// Decide whether one request may be forwarded.
    ///
    /// `auto_approve` returns immediately; otherwise a live grant for the
    /// service suffices. Failing both, the human is prompted and the call
    /// suspends until the first of {decision, deadline}. Between the prompt
    /// and the decision no locks are held.
    pub async fn check(
        &self,
        def: &ServiceDefinition,
        method: &str,
        path: &str,
        agent_ip: &str,
    ) -> bool {
        if resolve_action(&def.policy, method, path) == PolicyAction::AutoApprove {
            return true;
        }
        if self.has_live_grant(&def.name) {
            return true;
        }
        self.await_decision(&def.name, method, path, agent_ip).await
    }

    fn has_live_grant(&self, service: &str) -> bool {
        let mut grants = self.grants.lock().expect("grants lock poisoned");
        match grants.get(service) {
            Some(grant) if grant.is_live(Utc::now()) => true,
            Some(_) => {
                // Lazily drop a grant that expired since it was installed.
                grants.remove(service);
                false
            }
            None => false,
        }
    }

    async fn await_decision(
        &self,
        service: &str,
        method: &str,
        path: &str,
        agent_ip: &str,
    ) -> bool {
        let prompt = ApprovalPrompt {
            request_id: Uuid::new_v4(),
            service: service.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            agent_ip: agent_ip.to_string(),
            requested_at: Utc::now(),
        };
        let request_id = prompt.request_id;
        let rx = self.pending.register(prompt.clone());

        info!(%request_id, service, method, path, "approval required, prompting");

        if let Err(err) = self.prompter.prompt(&prompt).await {
            warn!(%request_id, %err, "prompt delivery failed, denying");
            self.pending.fulfill(
                request_id,
                ApprovalDecision {
                    approved: false,
                    ttl_seconds: 0,
                    approver: SEND_FAILURE_APPROVER.to_string(),
                },
            );
        }

        let decision = match tokio::time::timeout(self.deadline, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => {
                // Registry entry vanished without a send; treat as timeout.
                ApprovalDecision {
                    approved: false,
                    ttl_seconds: 0,
                    approver: TIMEOUT_APPROVER.to_string(),
                }
            }
            Err(_) => {
                self.pending.discard(request_id);
                info!(%request_id, service, "approval deadline expired");
                ApprovalDecision {
                    approved: false,
                    ttl_seconds: 0,
                    approver: TIMEOUT_APPROVER.to_string(),
                }
            }
        };

        if !decision.approved {
            info!(%request_id, service, approver = %decision.approver, "denied");
            return false;
        }

        let now = Utc::now();
        let grant = Grant {
            service: service.to_string(),
            approved_by: decision.approver.clone(),
            granted_at: now,
            expires_at: now + chrono::Duration::seconds(decision.ttl_seconds),
        };

        // Persist first so a crash here leaves a row the next start hydrates.
        if let Err(err) = self
            .store
            .insert_approval(service, &decision.approver, decision.ttl_seconds, grant.expires_at)
            .await
        {
            warn!(service, %err, "grant not persisted; installing in memory anyway");
        }
        self.install(grant);

        info!(
            %request_id,
            service,
            approver = %decision.approver,
            ttl_seconds = decision.ttl_seconds,
            "approved"
        );
        true
    }

    fn install(&self, grant: Grant) {
        self.grants
            .lock()
            .expect("grants lock poisoned")
            .insert(grant.service.clone(), grant);
    }

    /// Revoke the live grant for one service, persistence-first. Returns
    /// whether a live grant existed. An in-flight prompt is untouched.
    pub async fn revoke(&self, service: &str) -> bool {
        if let Err(err) = self.store.revoke_service(service).await {
            warn!(service, %err, "revocation not persisted; dropping from memory anyway");
        }
        self.grants
            .lock()
            .expect("grants lock poisoned")
            .remove(service)
            .is_some()
    }

    /// Revoke every live grant. Returns how many were dropped.
    pub async fn revoke_all(&self) -> usize {
        let services: Vec<String> = {
            let grants = self.grants.lock().expect("grants lock poisoned");
            grants.keys().cloned().collect()
        };
        let mut dropped = 0;
        for service in services {
            if self.revoke(&service).await {
                dropped += 1;
            }
        }
        dropped
    }

    /// Rebuild the live map from the store: GC expired rows, then walk the
    /// remaining non-revoked rows newest-first keeping the first per
    /// service.
    pub async fn hydrate(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        self.store.delete_expired(now).await?;
        let rows = self.store.live_approvals(now).await?;

        let mut grants = self.grants.lock().expect("grants lock poisoned");
        grants.clear();
        for row in rows {
            grants.entry(row.service.clone()).or_insert(Grant {
                service: row.service,
                approved_by: row.approved_by,
                granted_at: row.timestamp,
                expires_at: row.expires_at,
            });
        }
        let count = grants.len();
        info!(grants = count, "approval state hydrated");
        Ok(count)
    }

    /// Snapshot of the live grants, for the status surface.
    pub fn live_grants(&self) -> Vec<Grant> {
        let now = Utc::now();
        self.grants
            .lock()
            .expect("grants lock poisoned")
            .values()
            .filter(|g| g.is_live(now))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_policy::{CredentialRecipe, PolicyRule, ServicePolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service(name: &str, rules: Vec<PolicyRule>) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            upstream: "https://api.github.com".to_string(),
            intercept_hosts: vec![],
            credential: CredentialRecipe::Bearer {
                token: "t".to_string(),
            },
            policy: ServicePolicy {
                default_action: PolicyAction::RequireApproval,
                rules,
            },
        }
    }

    /// Prompter that counts prompts and optionally answers each one.
    struct ScriptedPrompter {
        prompts: AtomicUsize,
        registry: Arc<PendingRegistry>,
        answer: Option<ApprovalDecision>,
        fail_send: bool,
    }

    #[async_trait]
    impl ApprovalPrompter for ScriptedPrompter {
        async fn prompt(&self, prompt: &ApprovalPrompt) -> Result<(), PromptError> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            if self.fail_send {
                return Err(PromptError("connection refused".to_string()));
            }
            if let Some(answer) = &self.answer {
                self.registry.fulfill(prompt.request_id, answer.clone());
            }
            Ok(())
        }
    }

    fn coordinator(
        answer: Option<ApprovalDecision>,
        fail_send: bool,
        deadline_ms: u64,
    ) -> (ApprovalCoordinator, Arc<ScriptedPrompter>, AuditStore) {
        let registry = Arc::new(PendingRegistry::new());
        let store = AuditStore::open_in_memory().unwrap();
        let prompter = Arc::new(ScriptedPrompter {
            prompts: AtomicUsize::new(0),
            registry: Arc::clone(&registry),
            answer,
            fail_send,
        });
        let coordinator = ApprovalCoordinator::new(
            registry,
            Arc::clone(&prompter) as Arc<dyn ApprovalPrompter>,
            store.clone(),
            Duration::from_millis(deadline_ms),
        );
        (coordinator, prompter, store)
    }

    fn approve(ttl_seconds: i64) -> ApprovalDecision {
        ApprovalDecision {
            approved: true,
            ttl_seconds,
            approver: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn auto_approve_skips_prompt() {
        let rules = vec![PolicyRule {
            method: Some("GET".to_string()),
            path_prefix: None,
            action: PolicyAction::AutoApprove,
        }];
        let (c, prompter, _) = coordinator(None, false, 50);
        assert!(c.check(&service("gh", rules), "GET", "/user", "127.0.0.1").await);
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn approval_installs_grant_and_persists() {
        let (c, prompter, store) = coordinator(Some(approve(3600)), false, 1000);
        let def = service("gh", vec![]);

        assert!(c.check(&def, "POST", "/repos", "127.0.0.1").await);
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 1);

        // Second request rides the grant without a new prompt.
        assert!(c.check(&def, "POST", "/repos", "127.0.0.1").await);
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 1);

        // Persisted before the first check returned.
        let rows = store.live_approvals(Utc::now()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].service, "gh");
        assert_eq!(rows[0].ttl_seconds, 3600);
    }

    #[tokio::test]
    async fn denial_installs_nothing() {
        let deny = ApprovalDecision {
            approved: false,
            ttl_seconds: 0,
            approver: "alice".to_string(),
        };
        let (c, _, store) = coordinator(Some(deny), false, 1000);
        let def = service("gh", vec![]);

        assert!(!c.check(&def, "DELETE", "/repos/a/b", "127.0.0.1").await);
        assert!(c.live_grants().is_empty());
        assert!(store.live_approvals(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deadline_denies() {
        let (c, _, _) = coordinator(None, false, 20);
        let def = service("gh", vec![]);
        assert!(!c.check(&def, "DELETE", "/x", "127.0.0.1").await);
        // The registry entry was cleaned up.
        assert!(c.pending.is_empty());
    }

    #[tokio::test]
    async fn send_failure_denies() {
        let (c, _, _) = coordinator(None, true, 1000);
        let def = service("gh", vec![]);
        assert!(!c.check(&def, "POST", "/x", "127.0.0.1").await);
        assert!(c.live_grants().is_empty());
    }

    #[tokio::test]
    async fn one_second_grant_expires() {
        let (c, prompter, _) = coordinator(Some(approve(1)), false, 1000);
        let def = service("gh", vec![]);

        assert!(c.check(&def, "POST", "/x", "127.0.0.1").await);
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        // Grant is stale now; a fresh prompt fires (and is approved again).
        assert!(c.check(&def, "POST", "/x", "127.0.0.1").await);
        assert_eq!(prompter.prompts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn revoke_drops_live_grant() {
        let (c, _, store) = coordinator(Some(approve(3600)), false, 1000);
        let def = service("gh", vec![]);
        assert!(c.check(&def, "POST", "/x", "127.0.0.1").await);

        assert!(c.revoke("gh").await);
        assert!(!c.revoke("gh").await);
        assert!(c.live_grants().is_empty());
        assert!(store.live_approvals(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoke_all_counts() {
        let (c, _, _) = coordinator(Some(approve(3600)), false, 1000);
        assert!(c.check(&service("gh", vec![]), "POST", "/x", "1.1.1.1").await);
        assert!(c.check(&service("slack", vec![]), "POST", "/x", "1.1.1.1").await);

        assert_eq!(c.revoke_all().await, 2);
        assert_eq!(c.revoke_all().await, 0);
    }

    #[tokio::test]
    async fn hydrate_keeps_newest_per_service() {
        let registry = Arc::new(PendingRegistry::new());
        let store = AuditStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .insert_approval("gh", "old", 600, now + chrono::Duration::seconds(300))
            .await
            .unwrap();
        store
            .insert_approval("gh", "new", 600, now + chrono::Duration::seconds(600))
            .await
            .unwrap();
        store
            .insert_approval("slack", "x", 1, now - chrono::Duration::seconds(5))
            .await
            .unwrap();

        let prompter = Arc::new(ScriptedPrompter {
            prompts: AtomicUsize::new(0),
            registry: Arc::clone(&registry),
            answer: None,
            fail_send: false,
        });
        let c = ApprovalCoordinator::new(
            registry,
            prompter as Arc<dyn ApprovalPrompter>,
            store,
            Duration::from_millis(50),
        );

        assert_eq!(c.hydrate().await.unwrap(), 1);
        let grants = c.live_grants();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].service, "gh");
        assert_eq!(grants[0].approved_by, "new");
    }
}
