use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

/// What the approver is asked to decide on. Everything the prompt renders.
#[derive(Debug, Clone)]
pub struct ApprovalPrompt {
    pub request_id: Uuid,
    pub service: String,
    pub method: String,
    pub path: String,
    pub agent_ip: String,
    pub requested_at: DateTime<Utc>,
}

/// An approver's answer, routed back to the waiting request.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub ttl_seconds: i64,
    pub approver: String,
}

struct PendingEntry {
    prompt: ApprovalPrompt,
    tx: oneshot::Sender<ApprovalDecision>,
}

/// The shared registry of in-flight approvals.
///
/// Request tasks insert and await; the notifier's reply handler looks up,
/// removes, and fulfills. Fulfillment is exactly-once by construction: the
/// one-shot sender leaves the map before it is used, so a second reply for
/// the same id finds nothing.
#[derive(Default)]
pub struct PendingRegistry {
    inner: Mutex<HashMap<Uuid, PendingEntry>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt and hand back the receiver the request task awaits.
    pub fn register(&self, prompt: ApprovalPrompt) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        let id = prompt.request_id;
        self.inner
            .lock()
            .expect("pending registry lock poisoned")
            .insert(id, PendingEntry { prompt, tx });
        rx
    }

    /// Resolve a pending approval. Returns the prompt it belonged to, or
    /// `None` when the id is unknown (already resolved or timed out).
    pub fn fulfill(&self, id: Uuid, decision: ApprovalDecision) -> Option<ApprovalPrompt> {
        let entry = self
            .inner
            .lock()
            .expect("pending registry lock poisoned")
            .remove(&id)?;
        // The receiver may be gone if the waiting task was torn down; the
        // decision is simply dropped in that case.
        let _ = entry.tx.send(decision);
        Some(entry.prompt)
    }

    /// Drop a pending approval without resolving it (deadline cleanup).
    pub fn discard(&self, id: Uuid) -> bool {
        self.inner
            .lock()
            .expect("pending registry lock poisoned")
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("pending registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> ApprovalPrompt {
        ApprovalPrompt {
            request_id: Uuid::new_v4(),
            service: "gh".to_string(),
            method: "DELETE".to_string(),
            path: "/repos/a/b".to_string(),
            agent_ip: "127.0.0.1".to_string(),
            requested_at: Utc::now(),
        }
    }

    fn decision(approved: bool) -> ApprovalDecision {
        ApprovalDecision {
            approved,
            ttl_seconds: 900,
            approver: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn fulfill_delivers_to_waiter() {
        let registry = PendingRegistry::new();
        let p = prompt();
        let id = p.request_id;
        let rx = registry.register(p);

        let fulfilled = registry.fulfill(id, decision(true));
        assert_eq!(fulfilled.unwrap().service, "gh");

        let got = rx.await.unwrap();
        assert!(got.approved);
        assert_eq!(got.ttl_seconds, 900);
        assert_eq!(got.approver, "alice");
    }

    #[tokio::test]
    async fn second_fulfill_finds_nothing() {
        let registry = PendingRegistry::new();
        let p = prompt();
        let id = p.request_id;
        let _rx = registry.register(p);

        assert!(registry.fulfill(id, decision(true)).is_some());
        assert!(registry.fulfill(id, decision(false)).is_none());
    }

    #[test]
    fn unknown_id_is_none() {
        let registry = PendingRegistry::new();
        assert!(registry.fulfill(Uuid::new_v4(), decision(true)).is_none());
    }

    #[tokio::test]
    async fn discard_makes_later_replies_miss() {
        let registry = PendingRegistry::new();
        let p = prompt();
        let id = p.request_id;
        let mut rx = registry.register(p);

        assert!(registry.discard(id));
        assert!(registry.fulfill(id, decision(true)).is_none());
        // The waiter sees a closed channel rather than a decision.
        assert!(rx.try_recv().is_err());
        assert!(registry.is_empty());
    }
}
