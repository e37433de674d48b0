//! # sealkeeper
//!
//! A Kubernetes operator that automatically unseals a Vault/OpenBao
//! stateful workload and keeps the secret material needed to do so (unseal
//! keys, login credentials) available to every operator replica without an
//! external datastore.
//!
//! ## Architecture
//!
//! ```text
//! Pod / Endpoints watchers → Cache (local or replicated) → Vault API
//!            ↓                        ↓
//!     Kubernetes API          Sync protocol (HTTP :8866)
//! ```
//!
//! ## Core Components
//!
//! - **Cache**: in-memory secret-state store; the replicated backend pushes
//!   shareable records to sibling replicas and can bootstrap from a peer
//! - **Peer Discovery**: resolves sibling replicas through the owning
//!   deployment's service endpoints
//! - **Sync Server**: axum-based listener for the inter-replica protocol
//! - **Reconcilers**: pod and endpoints watchers driving the unseal flow,
//!   plus periodic checks for Vaults outside the cluster

pub mod cache;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod operator;
pub mod vault;

// Re-export commonly used types
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
