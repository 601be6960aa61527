use chrono::{DateTime, Utc};

/// A time-bounded, service-scoped authorization installed after an
/// approval.
///
/// Only live grants exist in the coordinator's map: revocation removes the
/// entry outright (the revoked flag lives on the persisted row), and a
/// stale entry is dropped the first time a check observes it.
#[derive(Debug, Clone)]
pub struct Grant {
    pub service: String,
    pub approved_by: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Grant {
    /// A grant authorizes requests while `now` is before its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whole minutes until expiry, floored at zero. Shown on the status
    /// surface.
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_minutes().max(0)
    }
}
