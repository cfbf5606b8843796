//! HTTP client side of the registry protocol
//!
//! The registry keeps everything in HTTP headers:
//! - `GET <registry>` answers with [`SERVERS_HEADER`] holding a comma-joined list
//! - `POST <registry>` with [`SERVER_HEADER`] registers or refreshes that address

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::protocol::error::{Result, RpcError};
use crate::protocol::{SERVERS_HEADER, SERVER_HEADER};

/// Upper bound on a single registry round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Splits a comma-joined server list, dropping empty entries.
pub fn parse_servers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pooled HTTP client for talking to a registry.
#[derive(Clone)]
pub struct RegistryTransport {
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl RegistryTransport {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// Lists the servers the registry currently considers alive.
    pub async fn fetch_servers(&self, registry_url: &str) -> Result<Vec<String>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(parse_uri(registry_url)?)
            .body(Empty::new())?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| RpcError::Registry(format!("GET {} timed out", registry_url)))??;

        if !response.status().is_success() {
            return Err(RpcError::Registry(format!(
                "GET {} returned {}",
                registry_url,
                response.status()
            )));
        }

        let servers = match response.headers().get(SERVERS_HEADER) {
            Some(value) => {
                let value = value.to_str().map_err(|e| {
                    RpcError::Registry(format!("Invalid {} header: {}", SERVERS_HEADER, e))
                })?;
                parse_servers(value)
            }
            None => Vec::new(),
        };
        tracing::debug!(registry = registry_url, count = servers.len(), "fetched servers");

        Ok(servers)
    }

    /// Registers `addr` with the registry, or refreshes its heartbeat.
    pub async fn send_heartbeat(&self, registry_url: &str, addr: &str) -> Result<()> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(parse_uri(registry_url)?)
            .header(SERVER_HEADER, addr)
            .body(Empty::new())?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| RpcError::Registry(format!("POST {} timed out", registry_url)))??;

        if !response.status().is_success() {
            return Err(RpcError::Registry(format!(
                "Heartbeat to {} rejected with {}",
                registry_url,
                response.status()
            )));
        }

        Ok(())
    }
}

impl Default for RegistryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_uri(url: &str) -> Result<Uri> {
    url.parse::<Uri>()
        .map_err(|e| RpcError::Registry(format!("Invalid registry url '{}': {}", url, e)))
}
