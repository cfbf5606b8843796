//! minirpc Common Types and Transport
//!
//! Shared protocol definitions and wire handling for the minirpc crates.
//!
//! # Architecture
//!
//! - **Handshake**: one length-prefixed JSON [`Options`] frame opens every connection
//!   and names the codec for the rest of the stream
//! - **Messages**: each request/response is a [`Header`] frame followed by a body frame,
//!   both encoded with the negotiated [`transport::Codec`]
//! - **Correlation**: the client-chosen `seq` in the header is echoed by the server,
//!   so responses may arrive in any order
//!
//! # Components
//!
//! - [`protocol`] - handshake options, headers, errors, registry constants
//! - [`transport`] - framing, codecs, codec reader/writer, registry HTTP client

pub mod protocol;
pub mod transport;

pub use protocol::*;
