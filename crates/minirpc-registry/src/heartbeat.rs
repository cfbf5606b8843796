//! Periodic heartbeats from a server to a registry

use std::time::Duration;

use minirpc_common::protocol::error::Result;
use minirpc_common::transport::RegistryTransport;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::registry::DEFAULT_TIMEOUT;

/// Keeps one server address alive in a registry.
pub struct Heartbeat {
    registry: String,
    addr: String,
    interval: Duration,
    transport: RegistryTransport,
}

impl Heartbeat {
    /// # Arguments
    ///
    /// * `registry` - Full registry URL
    /// * `addr` - Address to announce, in `"protocol@host:port"` form
    /// * `interval` - Time between heartbeats; zero selects one minute less than
    ///   the default registry timeout
    pub fn new(registry: impl Into<String>, addr: impl Into<String>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_TIMEOUT - Duration::from_secs(60)
        } else {
            interval
        };
        Self {
            registry: registry.into(),
            addr: addr.into(),
            interval,
            transport: RegistryTransport::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sends one heartbeat now, then keeps sending every `interval` in the background.
    ///
    /// # Returns
    ///
    /// The first heartbeat's error, or the handle of the background task. The task
    /// stops at the first failed heartbeat.
    pub async fn start(self) -> Result<JoinHandle<()>> {
        self.send().await?;
        Ok(tokio::spawn(self.run()))
    }

    async fn send(&self) -> Result<()> {
        tracing::debug!(addr = %self.addr, registry = %self.registry, "send heart beat to registry");
        self.transport.send_heartbeat(&self.registry, &self.addr).await
    }

    async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.send().await {
                tracing::error!(addr = %self.addr, "rpc server: heart beat err: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Registry, RegistryServer};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[test]
    fn test_default_interval() {
        let heartbeat = Heartbeat::new("http://127.0.0.1:1/", "tcp@127.0.0.1:2", Duration::ZERO);
        assert_eq!(heartbeat.interval(), Duration::from_secs(4 * 60));
    }

    #[tokio::test]
    async fn test_first_heartbeat_failure_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let heartbeat = Heartbeat::new(
            format!("http://{}/_minirpc_/registry", addr),
            "tcp@127.0.0.1:2",
            Duration::from_secs(1),
        );
        assert!(heartbeat.start().await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeats_keep_server_alive() {
        let registry = Arc::new(Registry::new(Duration::from_millis(150)));
        let server = RegistryServer::new(registry.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}{}", listener.local_addr().unwrap(), server.path());
        tokio::spawn(server.serve(listener));

        let task = Heartbeat::new(url, "tcp@127.0.0.1:2", Duration::from_millis(50))
            .start()
            .await
            .unwrap();
        assert_eq!(registry.alive_servers().await, vec!["tcp@127.0.0.1:2"]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.alive_servers().await, vec!["tcp@127.0.0.1:2"]);

        task.abort();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(registry.alive_servers().await.is_empty());
    }
}
