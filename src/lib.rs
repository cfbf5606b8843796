//! # minirpc
//!
//! A small multiplexed RPC framework.
//!
//! - [`common`]: handshake, headers, framing, codecs, errors
//! - [`server`]: services and the connection-serving [`server::Server`]
//! - [`client`]: [`client::Client`], dialing, discovery and [`client::XClient`]
//! - [`registry`]: heartbeat registry and its HTTP front end
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use minirpc::common::Options;
//! use minirpc::server::{Server, Service};
//!
//! # async fn run() -> minirpc::common::Result<()> {
//! let mut server = Server::new();
//! server.register(Service::new("Arith").method("Double", |n: i64| async move {
//!     Ok::<_, String>(n * 2)
//! }))?;
//! let server = Arc::new(server);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! let addr = listener.local_addr()?;
//! tokio::spawn(server.accept(listener));
//!
//! let client = minirpc::client::dial(&addr.to_string(), Options::default()).await?;
//! let reply: i64 = client.call("Arith.Double", &21i64).await?;
//! assert_eq!(reply, 42);
//! # Ok(())
//! # }
//! ```

pub use minirpc_client as client;
pub use minirpc_common as common;
pub use minirpc_registry as registry;
pub use minirpc_server as server;
