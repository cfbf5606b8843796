//! minirpc Registry
//!
//! A minimal service registry: servers send periodic heartbeats over HTTP and
//! clients list the servers whose last heartbeat is recent enough.
//!
//! # Components
//!
//! - [`Registry`]: address to last-heartbeat map with lazy expiry
//! - [`RegistryServer`]: axum front end serving GET (list) and POST (heartbeat)
//! - [`Heartbeat`]: server-side task keeping one address registered

pub mod heartbeat;
pub mod http_server;
pub mod registry;

pub use heartbeat::Heartbeat;
pub use http_server::RegistryServer;
pub use registry::{Registry, DEFAULT_TIMEOUT};
