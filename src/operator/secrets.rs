//! Bootstrap-secret seeding.
//!
//! At startup the watch namespace is scanned for secrets labeled with the
//! owning StatefulSet name. Each one seeds the cache with credentials, the
//! secret path, and any pre-provisioned unseal keys, so a replica can start
//! working before any peer or Vault is reachable.

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::info;

use crate::cache::Cache;
use crate::config::{
    DEFAULT_SECRET_PATH, KEY_PASSWORD, KEY_PREFIX_UNSEAL_KEY, KEY_ROLE, KEY_SECRET_PATH,
    KEY_USERNAME, LABEL_STATEFUL_SET,
};
use crate::domain::VaultState;
use crate::errors::Result;

/// Seed the cache from labeled bootstrap secrets. Existing cache entries are
/// left untouched so a snapshot pulled from a peer wins over stale secrets.
pub async fn seed_from_secrets(
    client: &Client,
    namespace: &str,
    cache: &dyn Cache,
) -> Result<usize> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let list = secrets.list(&ListParams::default().labels(LABEL_STATEFUL_SET)).await?;

    let mut seeded = 0;
    for secret in &list.items {
        let Some(owner) = secret.metadata.labels.as_ref().and_then(|l| l.get(LABEL_STATEFUL_SET))
        else {
            continue;
        };
        if cache.vault_state(owner).is_some() {
            continue;
        }
        cache.set_vault_state(owner, extract_vault_state(secret, owner)).await;
        seeded += 1;
    }

    info!(namespace = %namespace, secrets = seeded, "seeded cache from unseal secrets");
    Ok(seeded)
}

/// Build a cache record from one bootstrap secret.
pub(crate) fn extract_vault_state(secret: &Secret, owner: &str) -> VaultState {
    let mut state = VaultState { owner: owner.to_string(), ..Default::default() };
    state.secret_path = DEFAULT_SECRET_PATH.to_string();

    for (key, value) in secret.data.iter().flatten() {
        let value = String::from_utf8_lossy(&value.0).to_string();
        match key.as_str() {
            KEY_USERNAME => state.username = Some(value),
            KEY_PASSWORD => state.password = Some(value),
            KEY_ROLE => state.role = Some(value),
            KEY_SECRET_PATH => state.secret_path = value,
            // BTreeMap iteration keeps the key shares in their labeled order.
            key if key.starts_with(KEY_PREFIX_UNSEAL_KEY) => state.unseal_keys.push(value),
            _ => {}
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret_with(data: &[(&str, &str)]) -> Secret {
        let data: BTreeMap<String, ByteString> = data
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect();
        Secret { data: Some(data), ..Default::default() }
    }

    #[test]
    fn extracts_credentials_and_keys() {
        let secret = secret_with(&[
            ("username", "unsealer"),
            ("password", "hunter2"),
            ("secretPath", "kv/data/unseal"),
            ("unsealKey1", "k1"),
            ("unsealKey2", "k2"),
            ("unrelated", "ignored"),
        ]);

        let state = extract_vault_state(&secret, "vault");
        assert_eq!(state.owner, "vault");
        assert_eq!(state.username.as_deref(), Some("unsealer"));
        assert_eq!(state.password.as_deref(), Some("hunter2"));
        assert_eq!(state.secret_path, "kv/data/unseal");
        assert_eq!(state.unseal_keys, vec!["k1".to_string(), "k2".to_string()]);
    }

    #[test]
    fn secret_path_defaults_when_absent() {
        let secret = secret_with(&[("username", "unsealer")]);
        let state = extract_vault_state(&secret, "vault");
        assert_eq!(state.secret_path, DEFAULT_SECRET_PATH);
        assert!(!state.is_shareable());
    }
}
