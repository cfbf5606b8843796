//! minirpc Transport Layer
//!
//! # Components
//!
//! - **[`frame`]**: `[u32 big-endian length] + [payload]` framing
//! - **[`Codec`]**: JSON (default) or postcard encoding of headers and bodies
//! - **[`CodecReader`] / [`CodecWriter`]**: header/body frame pairs over a stream
//! - **[`RegistryTransport`]**: HTTP client for the registry's heartbeat/listing surface

pub mod codec;
pub mod conn;
pub mod frame;
pub mod http;

pub use codec::{Codec, JsonCodec, PostcardCodec};
pub use conn::{CodecReader, CodecWriter};
pub use http::{parse_servers, RegistryTransport};
