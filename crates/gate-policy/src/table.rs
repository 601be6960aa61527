use std::sync::{Arc, RwLock};

use crate::schema::ServiceDefinition;

/// The live service table.
///
/// Read on every request, written by the admin override surface. Entries are
/// whole `Arc<ServiceDefinition>` values swapped atomically under a briefly
/// held lock, so a reader never observes a half-updated definition. Declared
/// order is preserved because host-header routing picks the first
/// intercept-hostname match.
pub struct ServiceTable {
    inner: RwLock<Vec<Arc<ServiceDefinition>>>,
}

impl ServiceTable {
    pub fn new(definitions: Vec<ServiceDefinition>) -> Self {
        Self {
            inner: RwLock::new(definitions.into_iter().map(Arc::new).collect()),
        }
    }

    /// Look up a service by name.
    pub fn get(&self, name: &str) -> Option<Arc<ServiceDefinition>> {
        self.inner
            .read()
            .expect("service table lock poisoned")
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    /// Find the first service whose intercept-hostname list contains `host`
    /// (compared case-insensitively; the caller strips any port first).
    pub fn match_host(&self, host: &str) -> Option<Arc<ServiceDefinition>> {
        self.inner
            .read()
            .expect("service table lock poisoned")
            .iter()
            .find(|d| {
                d.intercept_hosts
                    .iter()
                    .any(|h| h.eq_ignore_ascii_case(host))
            })
            .cloned()
    }

    /// Names of every configured service, in declared order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("service table lock poisoned")
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    /// Snapshot of every definition.
    pub fn snapshot(&self) -> Vec<Arc<ServiceDefinition>> {
        self.inner
            .read()
            .expect("service table lock poisoned")
            .clone()
    }

    /// Install a definition, replacing an existing one of the same name in
    /// place (keeping its position) or appending a new one.
    pub fn upsert(&self, definition: ServiceDefinition) {
        let definition = Arc::new(definition);
        let mut table = self.inner.write().expect("service table lock poisoned");
        match table.iter_mut().find(|d| d.name == definition.name) {
            Some(slot) => *slot = definition,
            None => table.push(definition),
        }
    }

    /// Remove a service by name. Returns whether an entry was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut table = self.inner.write().expect("service table lock poisoned");
        let before = table.len();
        table.retain(|d| d.name != name);
        table.len() != before
    }
}
