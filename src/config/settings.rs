//! # Configuration Settings
//!
//! Defines the configuration structures for the sealkeeper operator. All
//! settings are derived from environment variables via `from_env()`
//! constructors; the pod identity fields are expected to be injected through
//! the Kubernetes downward API.

use crate::errors::{Error, Result};

/// Default port of the inter-replica sync protocol. Dedicated to the cache,
/// separate from any health or metrics port.
pub const DEFAULT_SYNC_PORT: u16 = 8866;

/// Identity of the local operator pod, injected via the downward API.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Namespace the operator runs in
    pub namespace: String,
    /// Name of the local pod (`HOSTNAME`)
    pub pod_name: String,
    /// IP of the local pod, used to exclude self from peer discovery
    pub pod_ip: Option<String>,
}

impl Identity {
    /// Load the pod identity from the environment.
    ///
    /// The namespace and pod name are required; the pod IP is optional so
    /// that development mode can run outside a cluster.
    pub fn from_env() -> Result<Self> {
        let namespace = std::env::var("POD_NAMESPACE")
            .map_err(|_| Error::config("POD_NAMESPACE is not set"))?;
        let pod_name =
            std::env::var("HOSTNAME").map_err(|_| Error::config("HOSTNAME is not set"))?;
        let pod_ip = std::env::var("POD_IP").ok().filter(|ip| !ip.is_empty());

        Ok(Self { namespace, pod_name, pod_ip })
    }
}

/// Settings of the inter-replica sync protocol.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bind address of the sync listener
    pub bind_address: String,
    /// Port the sync protocol listens on; every replica must use the same one
    pub port: u16,
    /// Development mode: peer addresses are rewritten to localhost and the
    /// owning deployment is resolved via `DEPLOYMENT_NAME`
    pub development_mode: bool,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("SEALKEEPER_SYNC_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| Error::config(format!("Invalid SEALKEEPER_SYNC_PORT: {}", e)))?,
            Err(_) => DEFAULT_SYNC_PORT,
        };

        Ok(Self {
            bind_address: "0.0.0.0".to_string(),
            port,
            development_mode: env_flag("DEVELOPMENT_MODE"),
        })
    }
}

/// Settings of the reconciliation side of the operator.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace the operator watches for Vault pods and bootstrap secrets
    pub watch_namespace: String,
    /// Development-mode override of the owning deployment name
    pub deployment_name: Option<String>,
    /// URL scheme used to reach Vault pods in development mode
    pub development_scheme: String,
}

impl OperatorConfig {
    pub fn from_env(identity: &Identity) -> Self {
        Self {
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .unwrap_or_else(|_| identity.namespace.clone()),
            deployment_name: std::env::var("DEPLOYMENT_NAME").ok().filter(|n| !n.is_empty()),
            development_scheme: std::env::var("DEVELOPMENT_MODE_SCHEMA")
                .unwrap_or_else(|_| "https".to_string()),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Log level filter applied when `RUST_LOG` is not set
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logs: true }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self {
            log_level: std::env::var("SEALKEEPER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            json_logs: !env_flag("SEALKEEPER_LOG_PLAIN"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
}
