//! HTTP Server for the Registry
//!
//! One path (default [`DEFAULT_REGISTRY_PATH`]) carries the whole protocol:
//! - `GET` lists alive servers in the `X-Minirpc-Servers` response header
//! - `POST` with `X-Minirpc-Server` records a heartbeat for that address
//! - any other method is answered 405

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use minirpc_common::protocol::error::{Result, RpcError};
use minirpc_common::{DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};
use tokio::net::TcpListener;
use tracing::info;

use crate::registry::Registry;

/// HTTP front end of a [`Registry`].
pub struct RegistryServer {
    registry: Arc<Registry>,
    path: String,
}

impl RegistryServer {
    /// Creates a server for `registry` on the default path.
    ///
    /// # Arguments
    /// * `registry` - Shared registry state
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            path: DEFAULT_REGISTRY_PATH.to_string(),
        }
    }

    /// Serves the registry on `path` instead of the default.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Builds the axum router.
    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .route(&self.path, get(list_servers).post(put_server))
            .with_state(self.registry.clone())
    }

    /// Binds `addr` and serves until failure.
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "0.0.0.0:9999")
    ///
    /// # Returns
    /// - `Ok(())` - Server ran successfully
    /// - `Err(RpcError)` - Server failed to start or run
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(
            "rpc registry listening on {}{}",
            listener.local_addr()?,
            self.path
        );

        axum::serve(listener, self.router())
            .await
            .map_err(|e| RpcError::Transport(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// Handles GET: reports alive servers.
async fn list_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let servers = registry.alive_servers().await;
    (StatusCode::OK, [(SERVERS_HEADER, servers.join(","))])
}

/// Handles POST: records a heartbeat.
async fn put_server(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    let addr = headers
        .get(SERVER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if addr.is_empty() {
        tracing::warn!("rpc registry: heartbeat without {} header", SERVER_HEADER);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    registry.put_server(addr).await;
    StatusCode::OK
}
