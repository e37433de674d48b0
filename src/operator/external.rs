//! External Vault reconciliation.
//!
//! Vaults running outside the cluster cannot be found through pod events.
//! They are described by secrets labeled with a check interval and annotated
//! with a source Vault (where the unseal keys live) and one or more target
//! Vaults to keep unsealed. Each secret gets its own periodic check loop:
//! read the keys from the source if they are not cached yet, then unseal
//! every sealed target. As with the pod flow, no failure may take the
//! process down; check errors are logged and the loop continues.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::{error, info};

use crate::cache::Cache;
use crate::config::{ANNOTATION_EXTERNAL_SOURCE, ANNOTATION_EXTERNAL_TARGETS, LABEL_EXTERNAL};
use crate::domain::VaultState;
use crate::errors::{Error, Result};
use crate::vault::{self, SealStatus};

use super::secrets::extract_vault_state;

/// Check interval applied when the label value is not a parsable duration.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// One externally managed Vault deployment, parsed from its secret.
struct ExternalVault {
    name: String,
    interval: Duration,
    source: String,
    targets: Vec<String>,
}

/// Periodic unseal checks for Vaults described by external secrets.
pub struct ExternalUnsealer {
    cache: Arc<dyn Cache>,
    vaults: Vec<ExternalVault>,
}

impl ExternalUnsealer {
    /// List the external secrets of the namespace, seed the cache from them,
    /// and prepare one check loop per secret.
    pub async fn discover(
        client: &Client,
        namespace: &str,
        cache: Arc<dyn Cache>,
    ) -> Result<Self> {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
        let list = secrets.list(&ListParams::default().labels(LABEL_EXTERNAL)).await?;

        let mut vaults = Vec::new();
        for secret in &list.items {
            let Some(name) = secret.metadata.name.clone() else {
                continue;
            };
            if cache.vault_state(&name).is_none() {
                cache.set_vault_state(&name, extract_vault_state(secret, &name)).await;
            }
            vaults.push(external_vault(secret, name)?);
        }

        info!(namespace = %namespace, vaults = vaults.len(), "found external vault secrets");
        Ok(Self { cache, vaults })
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }

    /// Run every check loop; does not return during normal operation.
    pub async fn run(self) {
        let Self { cache, vaults } = self;
        let loops = vaults.into_iter().map(|vault| check_loop(cache.clone(), vault));
        futures::future::join_all(loops).await;
    }
}

/// Parse the secret into its check-loop description. Missing source or
/// target annotations are configuration errors; a malformed interval falls
/// back to the default.
fn external_vault(secret: &Secret, name: String) -> Result<ExternalVault> {
    let annotations = secret.metadata.annotations.as_ref();
    let source = annotations
        .and_then(|a| a.get(ANNOTATION_EXTERNAL_SOURCE))
        .ok_or_else(|| Error::config(format!("external secret {:?} has no source", name)))?
        .clone();
    let targets: Vec<String> = annotations
        .and_then(|a| a.get(ANNOTATION_EXTERNAL_TARGETS))
        .ok_or_else(|| Error::config(format!("external secret {:?} has no targets", name)))?
        .split(';')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(Error::config(format!("external secret {:?} has no targets", name)));
    }

    let interval = secret
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_EXTERNAL))
        .and_then(|v| parse_go_duration(v))
        .unwrap_or(DEFAULT_CHECK_INTERVAL);

    Ok(ExternalVault { name, interval, source, targets })
}

async fn check_loop(cache: Arc<dyn Cache>, vault: ExternalVault) {
    let mut ticker = tokio::time::interval(vault.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // The first tick fires immediately, so the check runs once at startup.
    loop {
        ticker.tick().await;
        check(cache.as_ref(), &vault).await;
    }
}

/// One check round: recover the keys from the source Vault when they are not
/// cached yet, then unseal every sealed target.
async fn check(cache: &dyn Cache, vault: &ExternalVault) {
    info!(secret = %vault.name, "starting seal check");

    let Some(mut state) = cache.vault_state(&vault.name) else {
        return;
    };

    if !state.is_shareable() {
        match recover_keys(&vault.source, &mut state).await {
            Ok(()) => {
                info!(secret = %vault.name, keys = state.unseal_keys.len(), "successfully read unseal keys from vault");
                cache.set_vault_state(&vault.name, state.clone()).await;
            }
            Err(e) => {
                error!(secret = %vault.name, source = %vault.source, error = %e, "could not read unseal keys");
                return;
            }
        }
    }

    for target in &vault.targets {
        if let Err(e) = check_target(target, &state).await {
            error!(secret = %vault.name, target = %target, error = %e, "error checking vault");
        }
    }
}

async fn recover_keys(address: &str, state: &mut VaultState) -> Result<()> {
    let (Some(username), Some(password)) = (state.username.clone(), state.password.clone()) else {
        return Err(Error::config("no credentials available to read unseal keys"));
    };

    let login_client = vault::new_client(address, None)?;
    let token = vault::userpass_login(&login_client, &username, &password).await?;

    let client = vault::new_client(address, Some(&token))?;
    vault::read_unseal_keys(&client, state).await
}

async fn check_target(address: &str, state: &VaultState) -> Result<()> {
    let client = vault::new_client(address, None)?;
    match vault::seal_status(&client).await? {
        SealStatus::Uninitialized => {
            info!(target = %address, "vault is not initialized");
        }
        SealStatus::Sealed => {
            vault::unseal(&client, state).await?;
            info!(target = %address, "successfully unsealed vault");
        }
        SealStatus::Unsealed => {}
    }
    Ok(())
}

/// Parse a Go-style duration label value such as `3m0s` or `90s`. Only the
/// units that make sense as a check interval are supported.
fn parse_go_duration(value: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match c {
            'h' => Duration::from_secs(3600),
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                Duration::from_millis(1)
            }
            'm' => Duration::from_secs(60),
            's' => Duration::from_secs(1),
            _ => return None,
        };
        total += unit * amount as u32;
    }

    if !digits.is_empty() || total.is_zero() {
        return None;
    }
    Some(total)
}
