use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use sealkeeper::{
    cache::{Cache, LocalCache, ReplicatedCache, SyncServer},
    cli::Args,
    config::{Identity, ObservabilityConfig, OperatorConfig, SyncConfig},
    discovery::KubePeerDirectory,
    observability::init_tracing,
    operator::{seed_from_secrets, EndpointsWatcher, ExternalUnsealer, PodWatcher},
    Error, Result, APP_NAME, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    // This must happen before any config is read from environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let args = Args::parse();
    init_tracing(&ObservabilityConfig::from_env())?;

    info!(app_name = APP_NAME, version = VERSION, "Starting sealkeeper operator");

    let identity = Identity::from_env()?;
    let sync_config = SyncConfig::from_env()?;
    let operator_config = OperatorConfig::from_env(&identity);
    info!(
        namespace = %identity.namespace,
        watch_namespace = %operator_config.watch_namespace,
        shared_cache = args.shared_cache,
        development_mode = sync_config.development_mode,
        "Loaded configuration from environment"
    );

    let client = kube::Client::try_default().await?;

    if args.shared_cache {
        run_shared(client, identity, sync_config, operator_config).await
    } else {
        run_local(client, sync_config, operator_config).await
    }
}

/// Single-replica mode: purely local cache, no sync protocol.
async fn run_local(
    client: kube::Client,
    sync_config: SyncConfig,
    operator_config: OperatorConfig,
) -> Result<()> {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new());
    seed_from_secrets(&client, &operator_config.watch_namespace, cache.as_ref()).await?;
    spawn_external_checks(&client, &operator_config.watch_namespace, cache.clone()).await?;

    let pods = PodWatcher::new(
        client,
        &operator_config,
        sync_config.development_mode,
        cache.clone(),
    );

    info!("starting reconcilers");
    tokio::select! {
        result = pods.run() => result,
        _ = shutdown_signal() => Ok(()),
    }
}

/// Multi-replica mode: replicated cache, sync server, membership feed.
async fn run_shared(
    client: kube::Client,
    identity: Identity,
    sync_config: SyncConfig,
    operator_config: OperatorConfig,
) -> Result<()> {
    let directory = Arc::new(KubePeerDirectory::new(
        client.clone(),
        identity.clone(),
        operator_config.deployment_name.clone(),
    ));

    let replicated =
        ReplicatedCache::new(directory.clone(), &sync_config, identity.pod_ip.as_deref())?;
    let cache: Arc<dyn Cache> = Arc::new(replicated.clone());

    seed_from_secrets(&client, &operator_config.watch_namespace, cache.as_ref()).await?;
    spawn_external_checks(&client, &operator_config.watch_namespace, cache.clone()).await?;

    // The server must be bound and serving before the bootstrap round below:
    // the peer answers with a callback to this listener, not in the response.
    let addr: SocketAddr = format!("{}:{}", sync_config.bind_address, sync_config.port)
        .parse()
        .map_err(|e| Error::config(format!("Invalid sync address: {}", e)))?;
    let server = SyncServer::bind(replicated.clone(), addr).await?;
    let mut server_task = tokio::spawn(server.serve(shutdown_signal()));

    // Pull a snapshot from a peer. Failure is logged, never fatal: a replica
    // with no peers and no pre-seeded secrets starts empty and converges
    // later.
    if let Err(e) = replicated.ask_peers().await {
        error!(error = %e, "unable to bootstrap cache from peers");
    }

    let pods = PodWatcher::new(
        client.clone(),
        &operator_config,
        sync_config.development_mode,
        cache.clone(),
    );

    // Without a resolvable owning deployment there is no membership feed;
    // the cache still works, pushes just wait for the next set_members call.
    let membership = match directory.deployment_selector().await {
        Ok(selector) => Some(EndpointsWatcher::new(
            client,
            &identity.namespace,
            selector,
            identity.pod_ip.clone(),
            cache.clone(),
        )),
        Err(e) => {
            warn!(error = %e, "could not resolve own deployment, membership feed disabled");
            None
        }
    };

    info!("starting shared cache and reconcilers");
    match membership {
        Some(endpoints) => {
            tokio::select! {
                result = &mut server_task => flatten_task(result),
                result = pods.run() => result,
                result = endpoints.run() => result,
            }
        }
        None => {
            tokio::select! {
                result = &mut server_task => flatten_task(result),
                result = pods.run() => result,
            }
        }
    }
}

/// Start the periodic check loops for externally described Vaults, if any.
/// They run detached; each loop logs its own failures and never ends.
async fn spawn_external_checks(
    client: &kube::Client,
    namespace: &str,
    cache: Arc<dyn Cache>,
) -> Result<()> {
    let external = ExternalUnsealer::discover(client, namespace, cache).await?;
    if !external.is_empty() {
        tokio::spawn(external.run());
    }
    Ok(())
}

fn flatten_task(result: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    result.map_err(|e| Error::internal(format!("sync server task failed: {}", e)))?
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "shutdown listener failed");
    }
}
