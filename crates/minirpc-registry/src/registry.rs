//! Registry state
//!
//! Servers announce themselves with heartbeats. A server stays alive for
//! `timeout` after its last heartbeat; expired entries are evicted lazily,
//! while listing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Time a server stays alive without a heartbeat.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    /// Creates a registry. A zero `timeout` keeps servers alive forever.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Adds `addr`, or refreshes its heartbeat time.
    pub async fn put_server(&self, addr: &str) {
        let mut servers = self.servers.lock().await;
        if servers.insert(addr.to_string(), Instant::now()).is_none() {
            tracing::info!(%addr, "rpc registry: new server");
        }
    }

    /// Returns the alive servers in sorted order, evicting expired ones.
    pub async fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().await;
        let timeout = self.timeout;

        servers.retain(|addr, last| {
            let alive = timeout.is_zero() || last.elapsed() < timeout;
            if !alive {
                tracing::info!(%addr, "rpc registry: server expired");
            }
            alive
        });

        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}
