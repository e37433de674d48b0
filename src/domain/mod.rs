//! # Domain Types
//!
//! The per-workload secret-state record shared between the reconciliation
//! flows, the Vault client, and the replicated cache.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Secret state of one Vault workload (identified by its StatefulSet name).
///
/// A record is created either from a bootstrap secret (typically credentials
/// without keys) or when the reconcile loop reads the unseal keys from an
/// already-unsealed Vault. It is only ever overwritten wholesale; it is never
/// deleted during normal operation.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultState {
    /// Name of the owning StatefulSet
    pub owner: String,
    /// Userpass login name, if credential-based key retrieval is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Userpass login password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Auth role, if role-based login is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// KV path of the secret holding the unseal keys (`<mount>/<path>`)
    #[serde(default)]
    pub secret_path: String,
    /// Recovered unseal keys; empty until read from Vault or a peer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unseal_keys: Vec<String>,
}

impl VaultState {
    /// Whether this record is worth propagating to peers.
    ///
    /// Only records carrying recovered unseal keys are shared; credentials
    /// alone never leave the local replica.
    pub fn is_shareable(&self) -> bool {
        !self.unseal_keys.is_empty()
    }

    /// Split the secret path into its mount and path components.
    ///
    /// Returns `None` when the path does not contain both components.
    pub fn secret_mount_and_path(&self) -> Option<(&str, &str)> {
        self.secret_path.split_once('/')
    }
}

// Passwords and unseal keys must never reach the logs through Debug output.
impl fmt::Debug for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultState")
            .field("owner", &self.owner)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("role", &self.role)
            .field("secret_path", &self.secret_path)
            .field("unseal_keys", &format_args!("[{} key(s)]", self.unseal_keys.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shareable_iff_unseal_keys_present() {
        let mut state = VaultState { owner: "vault".into(), ..Default::default() };
        assert!(!state.is_shareable());

        state.unseal_keys.push("key-1".into());
        assert!(state.is_shareable());
    }

    #[test]
    fn credentials_alone_are_not_shareable() {
        let state = VaultState {
            owner: "vault".into(),
            username: Some("unsealer".into()),
            password: Some("secret".into()),
            ..Default::default()
        };
        assert!(!state.is_shareable());
    }

    #[test]
    fn secret_path_splits_into_mount_and_path() {
        let state = VaultState {
            secret_path: "vault/data/unseal-keys".into(),
            ..Default::default()
        };
        assert_eq!(state.secret_mount_and_path(), Some(("vault", "data/unseal-keys")));

        let bare = VaultState { secret_path: "no-slash".into(), ..Default::default() };
        assert_eq!(bare.secret_mount_and_path(), None);
    }

    #[test]
    fn debug_redacts_secret_material() {
        let state = VaultState {
            owner: "vault".into(),
            password: Some("hunter2".into()),
            unseal_keys: vec!["k1".into(), "k2".into()],
            ..Default::default()
        };
        let rendered = format!("{:?}", state);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("k1"));
        assert!(rendered.contains("[2 key(s)]"));
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let state = VaultState {
            owner: "vault".into(),
            secret_path: "vault/data/unseal-keys".into(),
            unseal_keys: vec!["k1".into()],
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["secretPath"], "vault/data/unseal-keys");
        assert_eq!(json["unsealKeys"][0], "k1");
    }
}
