//! Load-balanced client
//!
//! [`XClient`] picks servers from a [`Discovery`], keeps one cached [`Client`]
//! per address, and offers unicast calls plus a broadcast to every server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use minirpc_common::protocol::error::{Result, RpcError};
use minirpc_common::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::{xdial, Client};
use crate::discovery::{Discovery, SelectMode};

/// Outcome shared by the units of one broadcast.
struct BroadcastState<R> {
    error: Option<RpcError>,
    reply: Option<R>,
}

pub struct XClient {
    discovery: Arc<dyn Discovery>,
    mode: SelectMode,
    options: Options,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl XClient {
    pub fn new(discovery: Arc<dyn Discovery>, mode: SelectMode, options: Options) -> Self {
        Self {
            discovery,
            mode,
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached client for `rpc_addr`, dialing a new one if needed.
    ///
    /// The cache lock is only held for map operations, never while dialing or
    /// closing an evicted client.
    async fn dial(&self, rpc_addr: &str) -> Result<Arc<Client>> {
        let stale = {
            let mut clients = self.clients.lock().await;
            if let Some(client) = clients.get(rpc_addr) {
                if client.is_available().await {
                    return Ok(client.clone());
                }
            }
            clients.remove(rpc_addr)
        };
        if let Some(stale) = stale {
            tracing::debug!(addr = rpc_addr, "evicting unavailable client");
            let _ = stale.close().await;
        }

        let client = Arc::new(xdial(rpc_addr, self.options.clone()).await?);

        let mut clients = self.clients.lock().await;
        // Another caller may have dialed the same address meanwhile
        if let Some(existing) = clients.get(rpc_addr) {
            if existing.is_available().await {
                return Ok(existing.clone());
            }
        }
        clients.insert(rpc_addr.to_string(), client.clone());
        Ok(client)
    }

    /// Calls `service_method` on one server chosen by the select mode.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let rpc_addr = self.discovery.get(self.mode).await?;
        let client = self.dial(&rpc_addr).await?;
        client.call(service_method, args).await
    }

    /// Like [`call`](Self::call), failing with [`RpcError::CallTimeout`] after `timeout`.
    pub async fn call_timeout<A, R>(
        &self,
        timeout: Duration,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let rpc_addr = self.discovery.get(self.mode).await?;
        let client = self.dial(&rpc_addr).await?;
        client.call_timeout(timeout, service_method, args).await
    }

    /// Calls `service_method` on every server.
    ///
    /// The first successful reply is stored in `reply`. The first failure is
    /// returned once every call has finished; it stops calls that have not been
    /// sent yet, while calls already sent run to completion and may still fill
    /// `reply`.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A, reply: &mut R) -> Result<()>
    where
        A: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        self.broadcast_inner(None, service_method, args, reply).await
    }

    /// Like [`broadcast`](Self::broadcast), with every call bounded by `timeout`.
    pub async fn broadcast_timeout<A, R>(
        &self,
        timeout: Duration,
        service_method: &str,
        args: &A,
        reply: &mut R,
    ) -> Result<()>
    where
        A: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        self.broadcast_inner(Some(timeout), service_method, args, reply)
            .await
    }

    async fn broadcast_inner<A, R>(
        &self,
        timeout: Option<Duration>,
        service_method: &str,
        args: &A,
        reply: &mut R,
    ) -> Result<()>
    where
        A: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let servers = self.discovery.get_all().await?;
        let token = CancellationToken::new();
        let state = Mutex::new(BroadcastState {
            error: None,
            reply: None,
        });

        let units = servers.iter().map(|rpc_addr| {
            let token = &token;
            let state = &state;
            async move {
                let result: Result<R> = async {
                    let client = tokio::select! {
                        client = self.dial(rpc_addr) => client?,
                        _ = token.cancelled() => return Err(RpcError::Cancelled),
                    };
                    if token.is_cancelled() {
                        return Err(RpcError::Cancelled);
                    }
                    match timeout {
                        Some(timeout) => client.call_timeout(timeout, service_method, args).await,
                        None => client.call(service_method, args).await,
                    }
                }
                .await;

                let mut state = state.lock().await;
                match result {
                    Ok(value) => {
                        if state.reply.is_none() {
                            state.reply = Some(value);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(addr = %rpc_addr, "broadcast call failed: {}", e);
                        if state.error.is_none() {
                            state.error = Some(e);
                            token.cancel();
                        }
                    }
                }
            }
        });
        futures::future::join_all(units).await;

        let state = state.into_inner();
        if let Some(value) = state.reply {
            *reply = value;
        }
        match state.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes every cached client.
    pub async fn close(&self) -> Result<()> {
        let clients: Vec<_> = self.clients.lock().await.drain().collect();
        for (addr, client) in clients {
            if let Err(e) = client.close().await {
                tracing::debug!(%addr, "close failed: {}", e);
            }
        }
        Ok(())
    }
}
