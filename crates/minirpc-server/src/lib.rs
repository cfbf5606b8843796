//! minirpc Server
//!
//! Hosts registered [`Service`]s over raw TCP ([`Server::accept`]) or behind an
//! HTTP CONNECT front end ([`Server::serve_http`]). Every connection negotiates
//! its codec and handle timeout through the handshake, then multiplexes requests
//! identified by their sequence number.

pub mod http;
pub mod server;
pub mod service;

pub use http::{MethodInfo, ServiceInfo};
pub use server::Server;
pub use service::{MethodType, Service};
