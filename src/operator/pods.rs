//! Vault pod reconciliation.
//!
//! Watches the pods of the watch namespace and drives every known Vault pod
//! toward the unsealed state: a sealed pod is unsealed with the cached keys;
//! an unsealed pod whose keys are not cached yet is logged into so the keys
//! can be read and written into the cache (which propagates them to peers).
//!
//! Seal-status changes do not surface as pod events, so a periodic rescan
//! complements the watch stream. No failure here may take the process down;
//! reconcile errors are logged and the loop continues.

use std::sync::Arc;
use std::time::Duration;

use futures::{pin_mut, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tracing::{debug, error, info};

use crate::cache::Cache;
use crate::config::{OperatorConfig, CONTAINER_NAME_VAULT, ENV_VAULT_ADDR};
use crate::domain::VaultState;
use crate::errors::Result;
use crate::vault::{self, SealStatus};

/// Interval of the full rescan that catches seal-status changes without a
/// corresponding pod event.
const RESYNC_INTERVAL: Duration = Duration::from_secs(30);

pub struct PodWatcher {
    api: Api<Pod>,
    cache: Arc<dyn Cache>,
    development_mode: bool,
    development_scheme: String,
}

impl PodWatcher {
    pub fn new(
        client: Client,
        config: &OperatorConfig,
        development_mode: bool,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            api: Api::namespaced(client, &config.watch_namespace),
            cache,
            development_mode,
            development_scheme: config.development_scheme.clone(),
        }
    }

    /// Run until the watch stream ends (process shutdown).
    pub async fn run(self) -> Result<()> {
        let stream =
            watcher(self.api.clone(), watcher::Config::default()).default_backoff().applied_objects();
        pin_mut!(stream);

        let mut resync = tokio::time::interval(RESYNC_INTERVAL);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = stream.try_next() => match event {
                    Ok(Some(pod)) => self.try_reconcile(&pod).await,
                    Ok(None) => return Ok(()),
                    Err(e) => error!(error = %e, "pod watch failed, backing off"),
                },
                _ = resync.tick() => self.rescan().await,
            }
        }
    }

    async fn rescan(&self) {
        match self.api.list(&ListParams::default()).await {
            Ok(pods) => {
                for pod in &pods.items {
                    self.try_reconcile(pod).await;
                }
            }
            Err(e) => error!(error = %e, "could not list vault pods"),
        }
    }

    async fn try_reconcile(&self, pod: &Pod) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        if let Err(e) = self.reconcile(pod).await {
            error!(pod = %name, error = %e, "error reconciling vault pod");
        }
    }

    async fn reconcile(&self, pod: &Pod) -> Result<()> {
        // Only pods owned by a StatefulSet the cache knows about are ours.
        let Some(owner) = stateful_set_owner(pod) else {
            return Ok(());
        };
        let Some(state) = self.cache.vault_state(&owner) else {
            return Ok(());
        };
        if !is_ready(pod) {
            return Ok(());
        }

        let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
        let Some(address) = self.vault_address(pod) else {
            debug!(pod = %pod_name, "pod has no resolvable vault address");
            return Ok(());
        };

        let client = vault::new_client(&address, None)?;
        match vault::seal_status(&client).await? {
            SealStatus::Uninitialized => {
                info!(pod = %pod_name, "vault is not initialized");
                Ok(())
            }
            SealStatus::Sealed => {
                if !state.is_shareable() {
                    debug!(pod = %pod_name, "vault is sealed but no unseal keys are cached yet");
                    return Ok(());
                }
                vault::unseal(&client, &state).await?;
                info!(pod = %pod_name, vault = %owner, "successfully unsealed vault");
                Ok(())
            }
            SealStatus::Unsealed => {
                if state.is_shareable() {
                    return Ok(());
                }
                self.recover_keys(&address, &owner, state).await
            }
        }
    }

    /// Log in to an unsealed Vault and read the unseal keys into the cache.
    async fn recover_keys(&self, address: &str, owner: &str, mut state: VaultState) -> Result<()> {
        let (Some(username), Some(password)) = (state.username.clone(), state.password.clone())
        else {
            debug!(vault = %owner, "no credentials available to read unseal keys");
            return Ok(());
        };

        let login_client = vault::new_client(address, None)?;
        let token = vault::userpass_login(&login_client, &username, &password).await?;

        let client = vault::new_client(address, Some(&token))?;
        vault::read_unseal_keys(&client, &mut state).await?;

        info!(vault = %owner, keys = state.unseal_keys.len(), "successfully read unseal keys from vault");
        self.cache.set_vault_state(owner, state).await;
        Ok(())
    }

    fn vault_address(&self, pod: &Pod) -> Option<String> {
        vault_address(pod, self.development_mode, &self.development_scheme)
    }
}

/// Address of the Vault API inside the pod, derived from the `VAULT_ADDR`
/// environment of the vault container and the pod IP. In development mode the
/// first replicas are assumed to be port-forwarded to fixed local ports.
fn vault_address(pod: &Pod, development_mode: bool, development_scheme: &str) -> Option<String> {
    if development_mode {
        let port = match pod.metadata.name.as_deref() {
            Some("vault-0") => Some(8200),
            Some("vault-1") => Some(8201),
            Some("vault-2") => Some(8202),
            _ => None,
        };
        if let Some(port) = port {
            return Some(format!("{}://localhost:{}", development_scheme, port));
        }
    }

    let pod_ip = pod.status.as_ref().and_then(|s| s.pod_ip.as_deref())?;
    let spec = pod.spec.as_ref()?;
    let container = spec.containers.iter().find(|c| c.name == CONTAINER_NAME_VAULT)?;
    let addr = container
        .env
        .iter()
        .flatten()
        .find(|e| e.name == ENV_VAULT_ADDR)
        .and_then(|e| e.value.as_deref())?;

    match parse_scheme_and_port(addr) {
        Some((scheme, port)) => Some(format!("{}://{}:{}", scheme, pod_ip, port)),
        None => {
            error!(pod = ?pod.metadata.name, addr = %addr, "error parsing vault url of pod");
            None
        }
    }
}

fn parse_scheme_and_port(addr: &str) -> Option<(&str, u16)> {
    let (scheme, rest) = addr.split_once("://")?;
    let port = match rest.rsplit_once(':') {
        Some((_, port)) => port.trim_end_matches('/').parse::<u16>().ok()?,
        None => match scheme {
            "https" => 443,
            "http" => 80,
            _ => return None,
        },
    };
    Some((scheme, port))
}

/// Name of the owning StatefulSet, if any.
fn stateful_set_owner(pod: &Pod) -> Option<String> {
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .find(|owner| owner.kind == "StatefulSet")
        .map(|owner| owner.name.clone())
}

fn is_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}
