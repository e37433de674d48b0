//! Non-replicating cache backend for single-replica deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::VaultState;

use super::Cache;

/// In-memory entry store guarded for concurrent access from the reconcile
/// flows and, when embedded in the replicated backend, the sync handlers.
#[derive(Default)]
pub struct LocalCache {
    entries: RwLock<HashMap<String, VaultState>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole store with a snapshot received from a peer.
    pub(crate) fn replace_all(&self, entries: HashMap<String, VaultState>) {
        *self.entries.write().expect("entry store lock poisoned") = entries;
    }

    /// Snapshot of the whole store, for handing to a bootstrapping peer.
    pub(crate) fn snapshot(&self) -> HashMap<String, VaultState> {
        self.entries.read().expect("entry store lock poisoned").clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.read().expect("entry store lock poisoned").is_empty()
    }

    pub(crate) fn insert(&self, owner: &str, state: VaultState) {
        self.entries.write().expect("entry store lock poisoned").insert(owner.to_string(), state);
    }

    pub(crate) fn get(&self, owner: &str) -> Option<VaultState> {
        self.entries.read().expect("entry store lock poisoned").get(owner).cloned()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.entries.read().expect("entry store lock poisoned").keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Cache for LocalCache {
    fn vaults(&self) -> Vec<String> {
        self.names()
    }

    fn vault_state(&self, owner: &str) -> Option<VaultState> {
        self.get(owner)
    }

    async fn set_vault_state(&self, owner: &str, state: VaultState) {
        self.insert(owner, state);
    }

    async fn sync_all(&self) {
        // Nothing to propagate without peers.
    }

    fn set_members(&self, _members: HashMap<String, String>) -> bool {
        false
    }
}
