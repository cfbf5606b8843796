//! Connection handshake
//!
//! Every connection starts with exactly one [`Options`] value sent by the client.
//! It is always encoded as a length-prefixed JSON object, whatever codec it names,
//! so the server can decode it before it knows how the rest of the stream is encoded.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::error::{Result, RpcError};
use crate::transport::frame;

/// Marks a minirpc connection; anything else is rejected during the handshake.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default bound on dialing plus handshaking.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire encoding negotiated for headers and bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CodecType {
    #[default]
    Json,
    Postcard,
}

impl CodecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecType::Json => "application/json",
            CodecType::Postcard => "application/postcard",
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecType {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "application/json" => Ok(CodecType::Json),
            "application/postcard" => Ok(CodecType::Postcard),
            other => Err(RpcError::UnsupportedCodec(other.to_string())),
        }
    }
}

/// Per-connection options negotiated once by the handshake.
///
/// A zero timeout means unbounded.
///
/// # Example
///
/// ```
/// use minirpc_common::protocol::{CodecType, Options};
/// use std::time::Duration;
///
/// let options = Options::default()
///     .with_codec(CodecType::Postcard)
///     .with_handle_timeout(Duration::from_secs(2));
/// assert_eq!(options.codec_type, CodecType::Postcard);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub magic_number: u32,
    pub codec_type: CodecType,
    /// Bound on connect plus handshake, enforced by the dialer
    pub connect_timeout: Duration,
    /// Bound on each request's handler, enforced by the server
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::Json,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    pub fn with_codec(mut self, codec_type: CodecType) -> Self {
        self.codec_type = codec_type;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }
}

/// JSON shape of the handshake frame.
#[derive(Debug, Serialize, Deserialize)]
struct HandshakeFrame {
    magic_number: u32,
    codec_type: String,
    connect_timeout_ms: u64,
    handle_timeout_ms: u64,
}

impl From<&Options> for HandshakeFrame {
    fn from(options: &Options) -> Self {
        Self {
            magic_number: options.magic_number,
            codec_type: options.codec_type.to_string(),
            connect_timeout_ms: options.connect_timeout.as_millis() as u64,
            handle_timeout_ms: options.handle_timeout.as_millis() as u64,
        }
    }
}

/// Encodes the handshake frame payload (without the length prefix).
pub fn encode_handshake(options: &Options) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&HandshakeFrame::from(options))?)
}

/// Decodes and validates a handshake payload.
///
/// # Errors
///
/// - `JsonSerialization` if the payload is not a handshake object
/// - `InvalidMagicNumber` if the magic number does not match [`MAGIC_NUMBER`]
/// - `UnsupportedCodec` if the named codec is unknown
pub fn decode_handshake(data: &[u8]) -> Result<Options> {
    let frame: HandshakeFrame = serde_json::from_slice(data)?;
    if frame.magic_number != MAGIC_NUMBER {
        return Err(RpcError::InvalidMagicNumber(frame.magic_number));
    }
    let codec_type = frame.codec_type.parse()?;

    Ok(Options {
        magic_number: frame.magic_number,
        codec_type,
        connect_timeout: Duration::from_millis(frame.connect_timeout_ms),
        handle_timeout: Duration::from_millis(frame.handle_timeout_ms),
    })
}

/// Sends the handshake as the first frame on a connection.
pub async fn write_handshake<W>(writer: &mut W, options: &Options) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode_handshake(options)?;
    let mut buf = Vec::with_capacity(payload.len() + 4);
    frame::encode_frame(&mut buf, &payload)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads and validates the first frame of a connection.
pub async fn read_handshake<R>(reader: &mut R) -> Result<Options>
where
    R: AsyncRead + Unpin,
{
    let payload = frame::read_frame(reader).await?;
    decode_handshake(&payload)
}
