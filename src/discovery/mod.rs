//! # Peer Discovery
//!
//! Derives the set of sibling operator replicas from the Kubernetes service
//! endpoints of the owning deployment. The owning deployment is resolved
//! through the pod ownership chain (pod -> ReplicaSet -> Deployment), or via
//! the `DEPLOYMENT_NAME` override in development mode.
//!
//! Discovery never retries internally; callers decide whether and when to
//! retry. A sole replica yields an empty peer set, which is a valid result.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Endpoints, Pod};
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

use crate::config::Identity;
use crate::errors::{Error, Result};

/// Directory of sibling operator replicas, keyed by pod IP with the pod name
/// as display value. The local replica is never part of the result.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn peers(&self) -> Result<HashMap<String, String>>;
}

/// Kubernetes-backed peer directory.
pub struct KubePeerDirectory {
    client: Client,
    identity: Identity,
    deployment_override: Option<String>,
}

impl KubePeerDirectory {
    pub fn new(client: Client, identity: Identity, deployment_override: Option<String>) -> Self {
        Self { client, identity, deployment_override }
    }

    /// Resolve the pod selector of the owning deployment as a label selector
    /// expression. Also used to scope the endpoints watch.
    pub async fn deployment_selector(&self) -> Result<String> {
        let ns = &self.identity.namespace;

        if let Some(name) = &self.deployment_override {
            return self.selector_of(ns, name).await;
        }

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let pod = pods.get(&self.identity.pod_name).await?;

        for owner in pod.metadata.owner_references.iter().flatten() {
            if owner.kind != "ReplicaSet" {
                continue;
            }
            let replica_sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), ns);
            let rs = replica_sets.get(&owner.name).await?;
            for rs_owner in rs.metadata.owner_references.iter().flatten() {
                if rs_owner.kind == "Deployment" {
                    return self.selector_of(ns, &rs_owner.name).await;
                }
            }
        }

        Err(Error::discovery(format!(
            "owning deployment of pod {:?} not found",
            self.identity.pod_name
        )))
    }

    async fn selector_of(&self, namespace: &str, name: &str) -> Result<String> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments.get(name).await?;

        let labels = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.match_labels.as_ref())
            .ok_or_else(|| Error::discovery(format!("deployment {:?} has no selector", name)))?;

        Ok(labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(","))
    }
}

#[async_trait]
impl PeerDirectory for KubePeerDirectory {
    async fn peers(&self) -> Result<HashMap<String, String>> {
        let selector = self.deployment_selector().await?;

        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), &self.identity.namespace);
        let list = endpoints.list(&ListParams::default().labels(&selector)).await?;

        let Some(ep) = list.items.first() else {
            return Err(Error::discovery("could not find a service endpoint"));
        };

        let peers = peers_from(ep, self.identity.pod_ip.as_deref());
        debug!(selector = %selector, peers = peers.len(), "resolved sibling replicas");
        Ok(peers)
    }
}

/// Extract the peer map from an endpoints object, excluding the given own IP.
/// Only ready addresses are considered.
pub fn peers_from(ep: &Endpoints, own_ip: Option<&str>) -> HashMap<String, String> {
    let mut peers = HashMap::new();
    for subset in ep.subsets.iter().flatten() {
        for address in subset.addresses.iter().flatten() {
            if Some(address.ip.as_str()) == own_ip {
                continue;
            }
            let name = address
                .target_ref
                .as_ref()
                .and_then(|target| target.name.clone())
                .unwrap_or_else(|| "N/A".to_string());
            peers.insert(address.ip.clone(), name);
        }
    }
    peers
}

/// Fixed peer directory, for development mode and tests.
pub struct StaticPeers {
    peers: HashMap<String, String>,
}

impl StaticPeers {
    pub fn new(peers: HashMap<String, String>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl PeerDirectory for StaticPeers {
    async fn peers(&self) -> Result<HashMap<String, String>> {
        Ok(self.peers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset, ObjectReference};

    fn endpoints(addresses: Vec<EndpointAddress>) -> Endpoints {
        Endpoints {
            subsets: Some(vec![EndpointSubset { addresses: Some(addresses), ..Default::default() }]),
            ..Default::default()
        }
    }

    fn address(ip: &str, pod: Option<&str>) -> EndpointAddress {
        EndpointAddress {
            ip: ip.to_string(),
            target_ref: pod.map(|name| ObjectReference {
                name: Some(name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn peers_from_excludes_own_ip() {
        let ep = endpoints(vec![
            address("10.0.0.1", Some("sealkeeper-a")),
            address("10.0.0.2", Some("sealkeeper-b")),
        ]);

        let peers = peers_from(&ep, Some("10.0.0.1"));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers.get("10.0.0.2").map(String::as_str), Some("sealkeeper-b"));
    }

    #[test]
    fn peers_from_defaults_missing_target_name() {
        let ep = endpoints(vec![address("10.0.0.3", None)]);
        let peers = peers_from(&ep, None);
        assert_eq!(peers.get("10.0.0.3").map(String::as_str), Some("N/A"));
    }

    #[test]
    fn peers_from_empty_endpoints_is_not_an_error() {
        let ep = Endpoints::default();
        assert!(peers_from(&ep, Some("10.0.0.1")).is_empty());
    }

    #[tokio::test]
    async fn static_peers_returns_fixed_map() {
        let directory = StaticPeers::new(HashMap::from([(
            "10.1.0.9".to_string(),
            "sealkeeper-x".to_string(),
        )]));
        let peers = directory.peers().await.unwrap();
        assert_eq!(peers.len(), 1);
    }
}
