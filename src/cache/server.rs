//! Inter-replica sync server.
//!
//! Three bearer-authenticated routes on a dedicated port (8866 by default):
//!
//! - `POST /sync/{owner}`: a peer pushing a freshly written record
//! - `GET /info`: a bootstrapping replica asking for a snapshot; the data is
//!   never returned in the response body but pushed back through a separate
//!   authenticated callback, so secret state cannot end up in a response an
//!   intermediary provoked by merely guessing the request shape
//! - `PUT /info`: the snapshot callback itself

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::domain::VaultState;
use crate::errors::{Error, Result};

use super::replicated::Snapshot;
use super::{Cache, ReplicatedCache};

/// Bound-but-not-yet-serving sync server.
///
/// Binding and serving are separate steps so a caller can hold an accepting
/// listener before the serve task is scheduled. A bootstrap round must not
/// start before the port is open: the snapshot comes back through a callback
/// to this very listener.
pub struct SyncServer {
    listener: TcpListener,
    router: Router,
}

impl SyncServer {
    /// Bind the sync listener. The socket accepts connections from here on.
    pub async fn bind(cache: ReplicatedCache, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            Error::transport(format!("Failed to bind sync listener on {}: {}", addr, e))
        })?;
        info!(address = %addr, "bound shared cache listener");
        Ok(Self { listener, router: router(cache) })
    }

    /// Serve the sync protocol until the shutdown future resolves, then
    /// drain gracefully.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        axum::serve(
            self.listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::transport(format!("Sync server error: {}", e)))
    }
}

fn router(cache: ReplicatedCache) -> Router {
    Router::new()
        .route("/sync/{owner}", post(post_sync))
        .route("/info", get(get_info).put(put_info))
        .layer(TraceLayer::new_for_http())
        .with_state(cache)
}

enum SyncError {
    Unauthorized,
    Malformed(String),
    Internal(String),
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            SyncError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            SyncError::Malformed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            SyncError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Extract the bearer value from the Authorization header.
fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

/// Inbound push of one record.
async fn post_sync(
    State(cache): State<ReplicatedCache>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(owner): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<serde_json::Value>, SyncError> {
    let token = bearer(&headers).ok_or(SyncError::Unauthorized)?;
    if !cache.authorize_push(&token) {
        return Err(SyncError::Unauthorized);
    }

    let state: VaultState = serde_json::from_slice(&body).map_err(|e| {
        error!(from = %addr.ip(), vault = %owner, error = %e, "could not parse owner info");
        SyncError::Malformed(e.to_string())
    })?;

    info!(
        from = %addr.ip(),
        vault = %owner,
        keys = state.unseal_keys.len(),
        "received vault info"
    );
    cache.apply_push(&owner, state);

    Ok(Json(json!({ "message": "ok" })))
}

/// Snapshot request from a bootstrapping replica.
///
/// The caller must prove to be a sibling: its source IP is cross-checked
/// against this replica's own peer directory before anything happens. The
/// snapshot then travels through a callback to the caller's sync port,
/// authenticated with the pull token the caller supplied.
async fn get_info(
    State(cache): State<ReplicatedCache>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> std::result::Result<StatusCode, SyncError> {
    info!(from = %addr.ip(), vaults = ?cache.vaults(), "info requested");

    let pull_token = bearer(&headers).ok_or(SyncError::Unauthorized)?;

    let peers: HashMap<String, String> = cache.peers().await.map_err(|e| {
        error!(ip = %addr.ip(), error = %e, "could not verify client");
        SyncError::Internal(e.to_string())
    })?;

    let caller_ip = addr.ip().to_string();
    if !peers.contains_key(&caller_ip) {
        return Err(SyncError::Unauthorized);
    }

    cache.send_snapshot_to(&caller_ip, &pull_token).await.map_err(|e| {
        error!(ip = %caller_ip, error = %e, "could not send info");
        SyncError::Internal(e.to_string())
    })?;

    Ok(StatusCode::OK)
}

/// Snapshot callback from the peer answering our bootstrap request.
async fn put_info(
    State(cache): State<ReplicatedCache>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<Vec<String>>, SyncError> {
    let token = bearer(&headers).ok_or(SyncError::Unauthorized)?;
    if !cache.pull_token_matches(&token) {
        return Err(SyncError::Unauthorized);
    }

    let snapshot: Snapshot = serde_json::from_slice(&body).map_err(|e| {
        error!(from = %addr.ip(), error = %e, "could not parse info");
        SyncError::Malformed(e.to_string())
    })?;

    // Re-validated atomically: the token may have been consumed by a
    // concurrent callback since the check above.
    cache.accept_snapshot(&token, snapshot).map_err(|_| SyncError::Unauthorized)?;

    info!(from = %addr.ip(), vaults = ?cache.vaults(), "received info from peer");
    Ok(Json(cache.vaults()))
}
