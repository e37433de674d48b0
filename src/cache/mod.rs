//! # Secret-State Cache
//!
//! One capability interface with swappable backends: [`LocalCache`] keeps the
//! state of a single replica, [`ReplicatedCache`] additionally propagates
//! shareable records to sibling replicas over the sync protocol and can
//! bootstrap itself from a peer. An earlier iteration of this subsystem used
//! a gossip mesh instead of platform discovery plus HTTP push/pull; a backend
//! of that shape would plug into the same trait.

mod replicated;
mod server;
mod simple;

pub use replicated::ReplicatedCache;
pub use server::SyncServer;
pub use simple::LocalCache;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::VaultState;

/// Capability interface over the secret-state cache.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Names of all workloads with cached state.
    fn vaults(&self) -> Vec<String>;

    /// Cached state of one workload.
    fn vault_state(&self, owner: &str) -> Option<VaultState>;

    /// Store the state of one workload, unconditionally overwriting.
    ///
    /// The local store is updated before any propagation is attempted, so a
    /// subsequent [`Cache::vault_state`] always observes the write.
    async fn set_vault_state(&self, owner: &str, state: VaultState);

    /// Re-broadcast every known record to the current cluster members.
    async fn sync_all(&self);

    /// Replace the cluster-member map the write path targets.
    ///
    /// Returns `true` when the map changed; the caller is expected to follow
    /// up with [`Cache::sync_all`] so joining replicas converge.
    fn set_members(&self, members: HashMap<String, String>) -> bool;
}
