//! Server discovery
//!
//! A [`Discovery`] supplies the addresses an [`XClient`](crate::XClient) balances
//! over. Addresses use the `"protocol@host:port"` form understood by
//! [`xdial`](crate::xdial).

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use minirpc_common::protocol::error::{Result, RpcError};
use minirpc_common::transport::RegistryTransport;
use tokio::sync::Mutex;

/// Refresh interval of [`RegistryDiscovery`] unless configured otherwise.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// How a single server is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectMode {
    #[default]
    Random,
    RoundRobin,
}

impl fmt::Display for SelectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectMode::Random => f.write_str("random"),
            SelectMode::RoundRobin => f.write_str("round-robin"),
        }
    }
}

impl FromStr for SelectMode {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(SelectMode::Random),
            "round-robin" | "roundrobin" => Ok(SelectMode::RoundRobin),
            other => Err(RpcError::InvalidRequest(format!(
                "rpc discovery: unknown select mode {}",
                other
            ))),
        }
    }
}

#[async_trait]
pub trait Discovery: Send + Sync {
    /// Reloads the server list from its source, if it has one.
    async fn refresh(&self) -> Result<()>;

    /// Replaces the server list.
    async fn update(&self, servers: Vec<String>) -> Result<()>;

    /// Picks one server.
    async fn get(&self, mode: SelectMode) -> Result<String>;

    /// Returns every known server.
    async fn get_all(&self) -> Result<Vec<String>>;
}

struct ServerList {
    servers: Vec<String>,
    index: usize,
}

/// Discovery over a fixed, manually updated list.
pub struct MultiServersDiscovery {
    state: Mutex<ServerList>,
}

impl MultiServersDiscovery {
    /// Creates the discovery with the round-robin cursor at a random position.
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            state: Mutex::new(ServerList {
                servers,
                index: rand::random::<u32>() as usize,
            }),
        }
    }
}

#[async_trait]
impl Discovery for MultiServersDiscovery {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.state.lock().await.servers = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        let mut state = self.state.lock().await;
        let n = state.servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServer);
        }

        match mode {
            SelectMode::Random => Ok(state.servers[rand::random_range(0..n)].clone()),
            SelectMode::RoundRobin => {
                let server = state.servers[state.index % n].clone();
                state.index = (state.index + 1) % n;
                Ok(server)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().await.servers.clone())
    }
}

/// Discovery backed by a registry, re-fetched once the list is older than `timeout`.
pub struct RegistryDiscovery {
    servers: MultiServersDiscovery,
    registry: String,
    timeout: Duration,
    last_update: Mutex<Option<Instant>>,
    transport: RegistryTransport,
}

impl RegistryDiscovery {
    /// # Arguments
    ///
    /// * `registry` - Full registry URL, e.g. `http://127.0.0.1:9999/_minirpc_/registry`
    /// * `timeout` - Maximum age of the cached list; zero selects [`DEFAULT_UPDATE_TIMEOUT`]
    pub fn new(registry: impl Into<String>, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_UPDATE_TIMEOUT
        } else {
            timeout
        };
        Self {
            servers: MultiServersDiscovery::new(Vec::new()),
            registry: registry.into(),
            timeout,
            last_update: Mutex::new(None),
            transport: RegistryTransport::new(),
        }
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        let mut last_update = self.last_update.lock().await;
        if last_update.is_some_and(|at| at.elapsed() < self.timeout) {
            return Ok(());
        }

        tracing::debug!(registry = %self.registry, "rpc registry: refresh servers from registry");
        let servers = self.transport.fetch_servers(&self.registry).await.map_err(|e| {
            tracing::warn!(registry = %self.registry, "rpc registry refresh err: {}", e);
            e
        })?;
        self.servers.update(servers).await?;
        *last_update = Some(Instant::now());
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        let mut last_update = self.last_update.lock().await;
        self.servers.update(servers).await?;
        *last_update = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.servers.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        self.servers.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers() -> Vec<String> {
        vec![
            "tcp@127.0.0.1:1".to_string(),
            "tcp@127.0.0.1:2".to_string(),
            "tcp@127.0.0.1:3".to_string(),
        ]
    }

    #[test]
    fn test_select_mode_parse() {
        assert_eq!("random".parse::<SelectMode>().unwrap(), SelectMode::Random);
        assert_eq!("round-robin".parse::<SelectMode>().unwrap(), SelectMode::RoundRobin);
        assert!("fastest".parse::<SelectMode>().is_err());
    }

    #[tokio::test]
    async fn test_round_robin_visits_every_server() {
        let discovery = MultiServersDiscovery::new(servers());

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(discovery.get(SelectMode::RoundRobin).await.unwrap());
        }
        seen.sort();
        assert_eq!(seen, servers());

        // The fourth pick wraps to the first of the cycle
        let first = discovery.get(SelectMode::RoundRobin).await.unwrap();
        discovery.get(SelectMode::RoundRobin).await.unwrap();
        discovery.get(SelectMode::RoundRobin).await.unwrap();
        assert_eq!(discovery.get(SelectMode::RoundRobin).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_random_picks_known_server() {
        let discovery = MultiServersDiscovery::new(servers());
        for _ in 0..10 {
            let server = discovery.get(SelectMode::Random).await.unwrap();
            assert!(servers().contains(&server));
        }
    }

    #[tokio::test]
    async fn test_empty_list() {
        let discovery = MultiServersDiscovery::new(Vec::new());
        assert!(matches!(
            discovery.get(SelectMode::RoundRobin).await,
            Err(RpcError::NoAvailableServer)
        ));
        assert!(discovery.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_list() {
        let discovery = MultiServersDiscovery::new(servers());
        discovery.update(vec!["tcp@127.0.0.1:9".to_string()]).await.unwrap();
        assert_eq!(discovery.get(SelectMode::Random).await.unwrap(), "tcp@127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_registry_discovery_uses_fresh_list() {
        // Unroutable registry: any network refresh would fail
        let discovery = RegistryDiscovery::new("http://127.0.0.1:1/_minirpc_/registry", Duration::ZERO);
        assert_eq!(discovery.timeout, DEFAULT_UPDATE_TIMEOUT);
        assert!(discovery.get_all().await.is_err());

        discovery.update(servers()).await.unwrap();
        assert_eq!(discovery.get_all().await.unwrap(), servers());
    }
}
