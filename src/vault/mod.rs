//! # Vault Client
//!
//! Thin wrapper over `vaultrs` for the calls the reconcile loop needs:
//! seal-status checks, unsealing, userpass login, and reading the unseal-key
//! secret from the KV engine (v1 or v2, decided by the mount options).

use serde_json::Value;
use tracing::debug;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::sys::ServerStatus;
use vaultrs::{kv1, kv2, sys};

use crate::config::KEY_PREFIX_UNSEAL_KEY;
use crate::domain::VaultState;
use crate::errors::{Error, Result};

/// Seal state of one Vault pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealStatus {
    /// Storage not initialized yet; nothing to do but wait
    Uninitialized,
    Sealed,
    Unsealed,
}

/// Build a client for one Vault pod, optionally carrying a client token.
///
/// Certificate verification is disabled: workload pods present self-signed
/// or service-CA certificates that are not in the operator's trust store.
pub fn new_client(address: &str, token: Option<&str>) -> Result<VaultClient> {
    let mut builder = VaultClientSettingsBuilder::default();
    builder.address(address).verify(false);
    if let Some(token) = token {
        builder.token(token);
    }
    let settings = builder
        .build()
        .map_err(|e| Error::config(format!("Invalid Vault client settings: {}", e)))?;

    VaultClient::new(settings).map_err(Error::from)
}

/// Check the seal status of the Vault behind the client.
pub async fn seal_status(client: &VaultClient) -> Result<SealStatus> {
    match sys::status(client).await? {
        ServerStatus::UNINITIALIZED => Ok(SealStatus::Uninitialized),
        ServerStatus::SEALED => Ok(SealStatus::Sealed),
        ServerStatus::OK | ServerStatus::STANDBY | ServerStatus::PERFSTANDBY => {
            Ok(SealStatus::Unsealed)
        }
        other => Err(Error::internal(format!("unexpected vault status {:?}", other))),
    }
}

/// Feed unseal keys until the Vault reports itself unsealed.
pub async fn unseal(client: &VaultClient, state: &VaultState) -> Result<()> {
    for key in &state.unseal_keys {
        let response = sys::unseal(client, Some(key.clone()), None, None).await?;
        if !response.sealed {
            return Ok(());
        }
    }
    Err(Error::internal("could not unseal vault"))
}

/// Log in with userpass credentials, returning the client token.
pub async fn userpass_login(
    client: &VaultClient,
    username: &str,
    password: &str,
) -> Result<String> {
    let auth = vaultrs::auth::userpass::login(client, "userpass", username, password).await?;
    Ok(auth.client_token)
}

/// Read the unseal-key secret at the record's secret path and merge the keys
/// into the record. The KV engine version is taken from the mount options.
pub async fn read_unseal_keys(client: &VaultClient, state: &mut VaultState) -> Result<()> {
    let (mount, path) = state
        .secret_mount_and_path()
        .ok_or_else(|| Error::config(format!("invalid secret path {:?}", state.secret_path)))?;

    let mounts = sys::mount::list(client).await?;
    let mount_info = mounts
        .get(&format!("{}/", mount))
        .ok_or_else(|| Error::config(format!("secret mount {:?} not found", mount)))?;

    let version = mount_info.options.as_ref().and_then(|o| o.get("version").cloned());
    let data: Value = match version.as_deref() {
        Some("1") => kv1::get(client, mount, path).await?,
        Some("2") | None => kv2::read(client, mount, path).await?,
        Some(other) => {
            return Err(Error::config(format!("unsupported kv version {:?}", other)));
        }
    };

    extract_unseal_keys(&data, state);
    debug!(vault = %state.owner, keys = state.unseal_keys.len(), "read unseal keys from vault");

    if state.unseal_keys.is_empty() {
        return Err(Error::internal(format!(
            "did not receive a valid secret with path {}",
            state.secret_path
        )));
    }
    Ok(())
}

/// Collect every `unsealKey*` field of the secret data into the record.
fn extract_unseal_keys(data: &Value, state: &mut VaultState) {
    if let Value::Object(map) = data {
        let mut fields: Vec<(&String, &Value)> =
            map.iter().filter(|(key, _)| key.starts_with(KEY_PREFIX_UNSEAL_KEY)).collect();
        fields.sort_by_key(|(key, _)| key.as_str());
        for (_, value) in fields {
            if let Some(key) = value.as_str() {
                state.unseal_keys.push(key.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_prefixed_keys_in_order() {
        let mut state = VaultState::default();
        let data = json!({
            "unsealKey2": "key-two",
            "unsealKey1": "key-one",
            "username": "unsealer",
            "password": "secret"
        });

        extract_unseal_keys(&data, &mut state);
        assert_eq!(state.unseal_keys, vec!["key-one".to_string(), "key-two".to_string()]);
    }

    #[test]
    fn ignores_non_object_data() {
        let mut state = VaultState::default();
        extract_unseal_keys(&json!("not-an-object"), &mut state);
        assert!(state.unseal_keys.is_empty());
    }

    #[test]
    fn ignores_unrelated_fields() {
        let mut state = VaultState::default();
        extract_unseal_keys(&json!({ "token": "x", "role": "y" }), &mut state);
        assert!(state.unseal_keys.is_empty());
    }
}
