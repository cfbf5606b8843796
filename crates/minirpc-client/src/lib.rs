//! minirpc Client
//!
//! - [`Client`]: one multiplexed connection, many concurrent calls
//! - [`dial`], [`dial_http`], [`xdial`]: connect over TCP or an HTTP CONNECT tunnel
//! - [`Discovery`]: where the servers are, either a fixed list or a registry
//! - [`XClient`]: load-balanced calls and broadcast across discovered servers

pub mod client;
pub mod discovery;
pub mod xclient;

pub use client::{dial, dial_http, xdial, Call, Client};
pub use discovery::{
    Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode, DEFAULT_UPDATE_TIMEOUT,
};
pub use xclient::XClient;
