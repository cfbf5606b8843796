use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::Result;
use crate::protocol::CodecType;

/// Codec for encoding/decoding headers and bodies on a negotiated connection.
///
/// The variant is picked once per connection from the handshake's [`CodecType`].
///
/// # Example
///
/// ```
/// use minirpc_common::protocol::CodecType;
/// use minirpc_common::transport::Codec;
///
/// let codec = Codec::from(CodecType::Json);
/// let encoded = codec.encode(&(1u32, "two")).unwrap();
/// let decoded: (u32, String) = codec.decode(&encoded).unwrap();
/// assert_eq!(decoded, (1, "two".to_string()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Json(JsonCodec),
    Postcard(PostcardCodec),
}

impl Codec {
    pub fn codec_type(&self) -> CodecType {
        match self {
            Codec::Json(_) => CodecType::Json,
            Codec::Postcard(_) => CodecType::Postcard,
        }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json(_) => JsonCodec::encode(value),
            Codec::Postcard(_) => PostcardCodec::encode(value),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Json(_) => JsonCodec::decode(data),
            Codec::Postcard(_) => PostcardCodec::decode(data),
        }
    }
}

impl From<CodecType> for Codec {
    fn from(codec_type: CodecType) -> Self {
        match codec_type {
            CodecType::Json => Codec::Json(JsonCodec),
            CodecType::Postcard => Codec::Postcard(PostcardCodec),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Json(JsonCodec)
    }
}

/// Self-describing JSON encoding (the default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Compact binary encoding. Both peers must agree on the exact types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostcardCodec;

impl PostcardCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(postcard::from_bytes(data)?)
    }
}
