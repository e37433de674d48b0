//! Replicated cache backend.
//!
//! Composes the entry store, the peer directory, and the trust tokens into
//! the inter-replica protocol: local-first writes with best-effort push
//! fan-out, a gated pull-based bootstrap, and membership-driven resync.
//!
//! Trust is established peer-to-peer with no external authority: the first
//! writer a replica hears from defines its trust domain (see
//! [`ReplicatedCache::authorize_push`]). This is first-writer-wins and not
//! Byzantine-safe; it assumes the closed pod network of a single controller
//! deployment.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::discovery::PeerDirectory;
use crate::domain::VaultState;
use crate::errors::{Error, Result};

use super::{Cache, LocalCache};

/// Wire representation of a full cache snapshot, exchanged during bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    /// All cached records, keyed by owner name
    pub vaults: HashMap<String, VaultState>,
    /// Write token of the replica handing out the snapshot
    pub token: String,
}

#[derive(Default)]
struct Tokens {
    /// Long-lived token shared by all converged replicas
    write: Option<String>,
    /// Single-use token scoping one bootstrap round
    pull: Option<String>,
}

struct Inner {
    store: LocalCache,
    tokens: Mutex<Tokens>,
    members: Mutex<HashMap<String, String>>,
    directory: Arc<dyn PeerDirectory>,
    http: reqwest::Client,
    sync_port: u16,
    development_mode: bool,
}

/// Cache backend replicating shareable records across operator replicas.
#[derive(Clone)]
pub struct ReplicatedCache {
    inner: Arc<Inner>,
}

impl ReplicatedCache {
    /// Per-call timeout of outbound peer requests.
    const PEER_TIMEOUT: Duration = Duration::from_secs(1);

    /// Create a replicated cache around the given peer directory.
    ///
    /// The outbound HTTP client is built here, once. When the local pod IP is
    /// known the client binds its source address to it, so peers can verify
    /// the caller against their own peer directory by source IP.
    pub fn new(
        directory: Arc<dyn PeerDirectory>,
        config: &SyncConfig,
        self_ip: Option<&str>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Self::PEER_TIMEOUT);
        if let Some(ip) = self_ip {
            let ip: IpAddr = ip
                .parse()
                .map_err(|e| Error::config(format!("Invalid pod IP {:?}: {}", ip, e)))?;
            builder = builder.local_address(ip);
        }
        let http = builder
            .build()
            .map_err(|e| Error::transport(format!("Failed to build peer client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                store: LocalCache::new(),
                tokens: Mutex::new(Tokens::default()),
                members: Mutex::new(HashMap::new()),
                directory,
                http,
                sync_port: config.port,
                development_mode: config.development_mode,
            }),
        })
    }

    /// Ask one reachable peer for a full snapshot of its cache.
    ///
    /// Invoked when this replica becomes the active one. Skipped when the
    /// store already holds entries under a live write token, so a converged
    /// replica never overwrites its state with a stale pull. The snapshot
    /// does not travel in the response: the peer calls back with a `PUT
    /// /info` carrying the data, authenticated with the single-use pull
    /// token minted here. That callback arrives while the request below is
    /// still in flight; the token is cleared when the round completes,
    /// whether it succeeded or not.
    ///
    /// When several replicas cold-start at once each runs its own round;
    /// rounds between empty replicas exchange empty snapshots and leave the
    /// trust domain unestablished for the first real write.
    pub async fn ask_peers(&self) -> Result<()> {
        if !self.inner.store.is_empty() && self.write_token().is_some() {
            debug!("cache already converged, skipping peer bootstrap");
            return Ok(());
        }

        let peers = self.inner.directory.peers().await?;
        if peers.is_empty() {
            info!("no sibling replicas found, starting with local state only");
            return Ok(());
        }

        let pull_token = Uuid::new_v4().to_string();
        self.inner.tokens.lock().expect("token lock poisoned").pull = Some(pull_token.clone());

        let mut ordered: Vec<(&String, &String)> = peers.iter().collect();
        ordered.sort();

        for (ip, name) in ordered {
            info!(name = %name, ip = %ip, "requesting cache info from peer");
            let url = format!("http://{}:{}/info", self.peer_host(ip), self.inner.sync_port);
            match self.inner.http.get(&url).bearer_auth(&pull_token).send().await {
                Ok(response) if response.status().is_success() => break,
                Ok(response) => {
                    error!(name = %name, ip = %ip, status = %response.status(), "peer rejected info request");
                }
                Err(e) => {
                    error!(name = %name, ip = %ip, error = %e, "could not request info from peer");
                }
            }
        }

        // Single use: the callback for this round has either been handled by
        // now or will never be accepted.
        self.inner.tokens.lock().expect("token lock poisoned").pull = None;
        Ok(())
    }

    /// Authenticate an inbound push, trust-on-first-use.
    ///
    /// A replica holding no write token adopts the caller's token as its
    /// ground truth; afterwards any mismatch is rejected.
    pub(crate) fn authorize_push(&self, bearer: &str) -> bool {
        let mut tokens = self.inner.tokens.lock().expect("token lock poisoned");
        match &tokens.write {
            Some(token) => token == bearer,
            None => {
                tokens.write = Some(bearer.to_string());
                true
            }
        }
    }

    /// Apply a record received from a peer. Local only, never re-propagated.
    pub(crate) fn apply_push(&self, owner: &str, state: VaultState) {
        self.inner.store.insert(owner, state);
    }

    /// Whether the bearer value equals the currently live pull token.
    pub(crate) fn pull_token_matches(&self, bearer: &str) -> bool {
        self.inner.tokens.lock().expect("token lock poisoned").pull.as_deref() == Some(bearer)
    }

    /// Validate a bootstrap callback and merge the snapshot in wholesale.
    ///
    /// The bearer value must equal the still-live pull token; the token is
    /// consumed on success. The received write token replaces our own. A
    /// peer that never minted a write token sends an empty one; adopting it
    /// would lock out every later genuine push, so it is ignored.
    pub(crate) fn accept_snapshot(&self, bearer: &str, snapshot: Snapshot) -> Result<()> {
        {
            let mut tokens = self.inner.tokens.lock().expect("token lock poisoned");
            match tokens.pull.as_deref() {
                Some(pull) if pull == bearer => {
                    tokens.pull = None;
                    if !snapshot.token.is_empty() {
                        tokens.write = Some(snapshot.token);
                    }
                }
                _ => return Err(Error::auth("invalid or consumed pull token")),
            }
        }
        self.inner.store.replace_all(snapshot.vaults);
        Ok(())
    }

    /// Send our full snapshot to a bootstrapping peer, authenticated with the
    /// pull token that peer supplied.
    pub(crate) async fn send_snapshot_to(&self, ip: &str, pull_token: &str) -> Result<()> {
        let body = Snapshot {
            vaults: self.inner.store.snapshot(),
            token: self.write_token().unwrap_or_default(),
        };
        let url = format!("http://{}:{}/info", ip, self.inner.sync_port);
        let response = self
            .inner
            .http
            .put(&url)
            .bearer_auth(pull_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("could not send info to {}: {}", ip, e)))?;

        if !response.status().is_success() {
            return Err(Error::transport(format!(
                "peer {} rejected snapshot with status {}",
                ip,
                response.status()
            )));
        }
        Ok(())
    }

    /// Current peers according to the directory; used by the sync server to
    /// verify that an info request comes from a legitimate sibling.
    pub(crate) async fn peers(&self) -> Result<HashMap<String, String>> {
        self.inner.directory.peers().await
    }

    fn write_token(&self) -> Option<String> {
        self.inner.tokens.lock().expect("token lock poisoned").write.clone()
    }

    /// Write token to push with, minted on first use.
    fn write_token_or_mint(&self) -> String {
        let mut tokens = self.inner.tokens.lock().expect("token lock poisoned");
        tokens.write.get_or_insert_with(|| Uuid::new_v4().to_string()).clone()
    }

    fn peer_host<'a>(&self, ip: &'a str) -> &'a str {
        // In development mode all replicas run on the local machine.
        if self.inner.development_mode {
            "localhost"
        } else {
            ip
        }
    }

    async fn push(&self, token: &str, ip: &str, name: &str, owner: &str, state: &VaultState) {
        let url = format!("http://{}:{}/sync/{}", self.peer_host(ip), self.inner.sync_port, owner);
        match self.inner.http.post(&url).bearer_auth(token).json(state).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(pod = %name, vault = %owner, "pushed vault info to peer");
            }
            Ok(response) => {
                error!(pod = %name, vault = %owner, status = %response.status(), "could not send owner info");
            }
            Err(e) => {
                error!(pod = %name, vault = %owner, error = %e, "could not send owner info");
            }
        }
    }
}

#[async_trait]
impl Cache for ReplicatedCache {
    fn vaults(&self) -> Vec<String> {
        self.inner.store.names()
    }

    fn vault_state(&self, owner: &str) -> Option<VaultState> {
        self.inner.store.get(owner)
    }

    async fn set_vault_state(&self, owner: &str, state: VaultState) {
        // Local first: reads must observe the write regardless of peer
        // reachability.
        self.inner.store.insert(owner, state.clone());

        if !state.is_shareable() {
            return;
        }

        let members = self.inner.members.lock().expect("member lock poisoned").clone();
        if members.is_empty() {
            return;
        }

        let token = self.write_token_or_mint();
        for (ip, name) in &members {
            // Best effort: a failed push is logged and forgotten.
            self.push(&token, ip, name, owner, &state).await;
        }
    }

    async fn sync_all(&self) {
        for owner in self.inner.store.names() {
            if let Some(state) = self.inner.store.get(&owner) {
                self.set_vault_state(&owner, state).await;
            }
        }
    }

    fn set_members(&self, members: HashMap<String, String>) -> bool {
        let mut current = self.inner.members.lock().expect("member lock poisoned");
        if *current == members {
            return false;
        }
        *current = members;
        true
    }
}
