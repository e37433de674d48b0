//! # Reconciliation Flows
//!
//! The collaborators around the cache: bootstrap-secret seeding at startup,
//! the pod watcher that checks and unseals Vault pods, the periodic checks
//! for Vaults outside the cluster, and the endpoints watcher that feeds
//! membership changes into the replicated cache.

pub mod endpoints;
pub mod external;
pub mod pods;
pub mod secrets;

pub use endpoints::EndpointsWatcher;
pub use external::ExternalUnsealer;
pub use pods::PodWatcher;
pub use secrets::seed_from_secrets;
