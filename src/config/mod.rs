//! # Configuration
//!
//! Environment-derived configuration for the sealkeeper operator.

mod settings;

pub use settings::{Identity, ObservabilityConfig, OperatorConfig, SyncConfig};

/// Operator identifier, used as the leader-election ID and label prefix.
pub const OPERATOR_ID: &str = "sealkeeper.io";

/// Label on bootstrap secrets naming the owning StatefulSet.
pub const LABEL_STATEFUL_SET: &str = "sealkeeper.io/stateful-set";

/// Label marking a secret as describing Vaults outside the cluster; the
/// value is the check interval (Go-style duration, e.g. `3m0s`).
pub const LABEL_EXTERNAL: &str = "sealkeeper.io/external";

/// Annotation with the address of the Vault the unseal keys are read from.
pub const ANNOTATION_EXTERNAL_SOURCE: &str = "sealkeeper.io/external-source";

/// Annotation with the `;`-separated addresses of the Vaults to unseal.
pub const ANNOTATION_EXTERNAL_TARGETS: &str = "sealkeeper.io/external-targets";

/// Default Vault KV path holding the unseal keys.
pub const DEFAULT_SECRET_PATH: &str = "vault/data/unseal-keys";

/// Bootstrap secret data keys.
pub const KEY_USERNAME: &str = "username";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_SECRET_PATH: &str = "secretPath";
pub const KEY_ROLE: &str = "role";
/// Prefix of the keys that carry individual unseal key shares.
pub const KEY_PREFIX_UNSEAL_KEY: &str = "unsealKey";

/// Name of the Vault container inside a workload pod.
pub const CONTAINER_NAME_VAULT: &str = "vault";

/// Environment variable the Vault container exposes its address with.
pub const ENV_VAULT_ADDR: &str = "VAULT_ADDR";
