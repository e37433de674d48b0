//! End-to-end tests of the inter-replica sync protocol.
//!
//! Each "replica" is a real `ReplicatedCache` with its sync server bound to
//! its own loopback address; all replicas of one test share the same port,
//! exactly like pods sharing the fixed sync port in a cluster. Outbound
//! clients pin their source address to the replica's IP, so peer
//! verification by source IP works the same way it does on a pod network.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use sealkeeper::cache::{Cache, ReplicatedCache, SyncServer};
use sealkeeper::config::SyncConfig;
use sealkeeper::discovery::StaticPeers;
use sealkeeper::domain::VaultState;

struct Replica {
    cache: ReplicatedCache,
    ip: String,
}

impl Replica {
    /// Create a replica; `listen` controls whether its sync server runs.
    async fn start(ip: &str, port: u16, peers: HashMap<String, String>, listen: bool) -> Self {
        let config = SyncConfig {
            bind_address: ip.to_string(),
            port,
            development_mode: false,
        };
        let cache =
            ReplicatedCache::new(Arc::new(StaticPeers::new(peers)), &config, Some(ip)).unwrap();

        if listen {
            // Binding is eager, so the port accepts from here on even while
            // the serve task is still being scheduled.
            let addr: SocketAddr = format!("{}:{}", ip, port).parse().unwrap();
            let server = SyncServer::bind(cache.clone(), addr).await.unwrap();
            tokio::spawn(server.serve(std::future::pending()));
        }

        Self { cache, ip: ip.to_string() }
    }

    fn url(&self, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.ip, port, path)
    }
}

/// Reserve a port that is free on the given loopback address.
async fn free_port(ip: &str) -> u16 {
    let listener = tokio::net::TcpListener::bind((ip, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

fn shareable(owner: &str, keys: &[&str]) -> VaultState {
    VaultState {
        owner: owner.to_string(),
        secret_path: "vault/data/unseal-keys".to_string(),
        unseal_keys: keys.iter().map(|k| k.to_string()).collect(),
        ..Default::default()
    }
}

fn peers(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries.iter().map(|(ip, name)| (ip.to_string(), name.to_string())).collect()
}

#[tokio::test]
async fn push_requires_authorization() {
    let port = free_port("127.0.0.2").await;
    let replica = Replica::start("127.0.0.2", port, HashMap::new(), true).await;

    // Seed an entry (and pin a write token) through an authorized push.
    let client = reqwest::Client::new();
    let response = client
        .post(replica.url(port, "/sync/vault"))
        .bearer_auth("token-a")
        .json(&shareable("vault", &["k1"]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Missing Authorization header: rejected, entry unchanged.
    let response = client
        .post(replica.url(port, "/sync/vault"))
        .json(&shareable("vault", &["evil"]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(replica.cache.vault_state("vault").unwrap().unseal_keys, vec!["k1".to_string()]);
}

#[tokio::test]
async fn malformed_push_changes_nothing() {
    let port = free_port("127.0.0.2").await;
    let replica = Replica::start("127.0.0.2", port, HashMap::new(), true).await;

    let response = reqwest::Client::new()
        .post(replica.url(port, "/sync/vault"))
        .bearer_auth("token-a")
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert!(replica.cache.vault_state("vault").is_none());
}

#[tokio::test]
async fn push_is_trust_on_first_use() {
    let ip_a = "127.0.0.2";
    let ip_b = "127.0.0.3";
    let port = free_port(ip_a).await;

    let b = Replica::start(ip_b, port, HashMap::new(), true).await;
    let a = Replica::start(ip_a, port, HashMap::new(), false).await;
    a.cache.set_members(peers(&[(ip_b, "sealkeeper-b")]));

    // First writer establishes the trust domain: B has no token yet and
    // adopts A's on the first push.
    let record = shareable("vault", &["k1", "k2"]);
    a.cache.set_vault_state("vault", record.clone()).await;
    assert_eq!(b.cache.vault_state("vault"), Some(record.clone()));

    // A third replica pushing with a different token is rejected.
    let response = reqwest::Client::new()
        .post(b.url(port, "/sync/vault"))
        .bearer_auth("someone-elses-token")
        .json(&shareable("vault", &["forged"]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(b.cache.vault_state("vault"), Some(record.clone()));

    // Re-pushing the identical record is idempotent.
    a.cache.set_vault_state("vault", record.clone()).await;
    assert_eq!(b.cache.vault_state("vault"), Some(record));
}

#[tokio::test]
async fn credentials_only_records_are_not_pushed() {
    let ip_a = "127.0.0.2";
    let ip_b = "127.0.0.3";
    let port = free_port(ip_a).await;

    let b = Replica::start(ip_b, port, HashMap::new(), true).await;
    let a = Replica::start(ip_a, port, HashMap::new(), false).await;
    a.cache.set_members(peers(&[(ip_b, "sealkeeper-b")]));

    let record = VaultState {
        owner: "vault".to_string(),
        username: Some("unsealer".to_string()),
        password: Some("secret".to_string()),
        ..Default::default()
    };
    a.cache.set_vault_state("vault", record.clone()).await;

    // Local read observes the write; the peer never hears about it.
    assert_eq!(a.cache.vault_state("vault"), Some(record));
    assert!(b.cache.vault_state("vault").is_none());
}

#[tokio::test]
async fn bootstrap_pulls_snapshot_and_adopts_token() {
    let ip_d = "127.0.0.2";
    let ip_e = "127.0.0.3";
    let port = free_port(ip_d).await;

    // E holds a record under write token "token-e"; its directory knows D.
    let e = Replica::start(ip_e, port, peers(&[(ip_d, "sealkeeper-d")]), true).await;
    let seed = reqwest::Client::new()
        .post(e.url(port, "/sync/vault"))
        .bearer_auth("token-e")
        .json(&shareable("vault", &["k1", "k2"]))
        .send()
        .await
        .unwrap();
    assert_eq!(seed.status(), 200);

    // D starts empty, discovers E, and asks for a snapshot. The data comes
    // back through E's callback to D's sync port.
    let d = Replica::start(ip_d, port, peers(&[(ip_e, "sealkeeper-e")]), true).await;
    d.cache.ask_peers().await.unwrap();

    assert_eq!(d.cache.vault_state("vault"), Some(shareable("vault", &["k1", "k2"])));

    // D now lives in E's trust domain: pushes under "token-e" are accepted,
    // anything else is not.
    let client = reqwest::Client::new();
    let accepted = client
        .post(d.url(port, "/sync/other"))
        .bearer_auth("token-e")
        .json(&shareable("other", &["k3"]))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 200);

    let rejected = client
        .post(d.url(port, "/sync/other"))
        .bearer_auth("not-token-e")
        .json(&shareable("other", &["k4"]))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 401);
}

#[tokio::test]
async fn bootstrap_succeeds_in_process_startup_order() {
    let ip_d = "127.0.0.2";
    let ip_e = "127.0.0.3";
    let port = free_port(ip_d).await;

    let e = Replica::start(ip_e, port, peers(&[(ip_d, "sealkeeper-d")]), true).await;
    let seed = reqwest::Client::new()
        .post(e.url(port, "/sync/vault"))
        .bearer_auth("token-e")
        .json(&shareable("vault", &["k1"]))
        .send()
        .await
        .unwrap();
    assert_eq!(seed.status(), 200);

    // Wire D exactly the way the binary does at startup: build the cache,
    // bind the server, hand serving to a task, then immediately ask peers.
    // The snapshot callback must find the listener open with no readiness
    // wait in between.
    let config = SyncConfig {
        bind_address: ip_d.to_string(),
        port,
        development_mode: false,
    };
    let directory = Arc::new(StaticPeers::new(peers(&[(ip_e, "sealkeeper-e")])));
    let d = ReplicatedCache::new(directory, &config, Some(ip_d)).unwrap();

    let addr: SocketAddr = format!("{}:{}", ip_d, port).parse().unwrap();
    let server = SyncServer::bind(d.clone(), addr).await.unwrap();
    tokio::spawn(server.serve(std::future::pending()));

    d.ask_peers().await.unwrap();
    assert_eq!(d.vault_state("vault"), Some(shareable("vault", &["k1"])));
}

#[tokio::test]
async fn info_request_from_unknown_caller_is_rejected() {
    let port = free_port("127.0.0.2").await;
    // Empty peer directory: nobody is a legitimate sibling.
    let replica = Replica::start("127.0.0.2", port, HashMap::new(), true).await;

    let response = reqwest::Client::new()
        .get(replica.url(port, "/info"))
        .bearer_auth("some-pull-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn unsolicited_snapshot_callback_is_rejected() {
    let port = free_port("127.0.0.2").await;
    let replica = Replica::start("127.0.0.2", port, HashMap::new(), true).await;

    // No bootstrap round is live, so no pull token exists to match.
    let body = serde_json::json!({
        "vaults": { "vault": shareable("vault", &["stolen"]) },
        "token": "attacker"
    });
    let response = reqwest::Client::new()
        .put(replica.url(port, "/info"))
        .bearer_auth("guessed-pull-token")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert!(replica.cache.vault_state("vault").is_none());
}

#[tokio::test]
async fn bootstrap_with_unreachable_first_peer_tries_the_next() {
    let ip_d = "127.0.0.2";
    let ip_e = "127.0.0.5";
    let port = free_port(ip_d).await;

    // Peer list starts with an address nothing listens on; E sorts after it.
    let e = Replica::start(ip_e, port, peers(&[(ip_d, "sealkeeper-d")]), true).await;
    let seed = reqwest::Client::new()
        .post(e.url(port, "/sync/vault"))
        .bearer_auth("token-e")
        .json(&shareable("vault", &["k1"]))
        .send()
        .await
        .unwrap();
    assert_eq!(seed.status(), 200);

    let d = Replica::start(
        ip_d,
        port,
        peers(&[("127.0.0.4", "sealkeeper-down"), (ip_e, "sealkeeper-e")]),
        true,
    )
    .await;
    d.cache.ask_peers().await.unwrap();

    assert_eq!(d.cache.vault_state("vault"), Some(shareable("vault", &["k1"])));
}
