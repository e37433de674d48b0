//! Membership feed.
//!
//! Watches the endpoints object of the operator's own deployment and feeds
//! every change into the replicated cache. A changed member map triggers a
//! full resync so replicas that joined (or rejoined) converge without
//! waiting for the next organic write.

use std::sync::Arc;

use futures::{pin_mut, TryStreamExt};
use k8s_openapi::api::core::v1::Endpoints;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tracing::{error, info};

use crate::cache::Cache;
use crate::discovery::peers_from;
use crate::errors::Result;

pub struct EndpointsWatcher {
    api: Api<Endpoints>,
    selector: String,
    own_ip: Option<String>,
    cache: Arc<dyn Cache>,
}

impl EndpointsWatcher {
    pub fn new(
        client: Client,
        namespace: &str,
        selector: String,
        own_ip: Option<String>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self { api: Api::namespaced(client, namespace), selector, own_ip, cache }
    }

    /// Run until the watch stream ends (process shutdown).
    pub async fn run(self) -> Result<()> {
        let config = watcher::Config::default().labels(&self.selector);
        let stream = watcher(self.api.clone(), config).default_backoff().applied_objects();
        pin_mut!(stream);

        loop {
            match stream.try_next().await {
                Ok(Some(endpoints)) => {
                    let members = peers_from(&endpoints, self.own_ip.as_deref());
                    if self.cache.set_members(members) {
                        info!("cluster membership changed, resyncing cache");
                        self.cache.sync_all().await;
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) => error!(error = %e, "endpoints watch failed, backing off"),
            }
        }
    }
}
