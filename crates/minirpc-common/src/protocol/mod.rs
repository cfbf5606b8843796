pub mod error;
pub mod handshake;
pub mod header;

pub use error::{Result, RpcError};
pub use handshake::{
    decode_handshake, encode_handshake, read_handshake, write_handshake, CodecType, Options,
    DEFAULT_CONNECT_TIMEOUT, MAGIC_NUMBER,
};
pub use header::Header;

/// Path the registry serves on unless configured otherwise.
pub const DEFAULT_REGISTRY_PATH: &str = "/_minirpc_/registry";

/// Response header carrying the comma-joined list of alive servers.
pub const SERVERS_HEADER: &str = "X-Minirpc-Servers";

/// Request header carrying the address of a server sending a heartbeat.
pub const SERVER_HEADER: &str = "X-Minirpc-Server";

/// Path of the HTTP front end's debug listing.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/minirpc";

/// Reason phrase sent back when an HTTP CONNECT is accepted.
pub const CONNECTED_REASON: &str = "Connected to minirpc";
