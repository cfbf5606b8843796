//! Header/body frame pairs over a negotiated connection
//!
//! A request or response is two consecutive frames: the encoded [`Header`]
//! followed by the encoded body. [`CodecReader`] enforces the header-then-body
//! alternation on the read side, [`CodecWriter`] emits both frames with a single
//! write so that a writer serialized by its owner never interleaves with another.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::Header;
use crate::transport::codec::Codec;
use crate::transport::frame;

/// Reads `(Header, Body)` pairs in strict alternation.
pub struct CodecReader<R> {
    reader: R,
    codec: Codec,
    body_pending: bool,
}

impl<R> CodecReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, codec: Codec) -> Self {
        Self {
            reader,
            codec,
            body_pending: false,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Reads the next header. The matching body must be consumed before the next call.
    pub async fn read_header(&mut self) -> Result<Header> {
        if self.body_pending {
            return Err(RpcError::Protocol(
                "header requested while a body is still unread".to_string(),
            ));
        }
        let data = frame::read_frame(&mut self.reader).await?;
        let header = self.codec.decode(&data)?;
        self.body_pending = true;
        Ok(header)
    }

    /// Reads the body frame following the last header without decoding it.
    pub async fn read_raw_body(&mut self) -> Result<Vec<u8>> {
        if !self.body_pending {
            return Err(RpcError::Protocol(
                "body requested before its header".to_string(),
            ));
        }
        let data = frame::read_frame(&mut self.reader).await?;
        self.body_pending = false;
        Ok(data)
    }

    /// Reads and decodes the body following the last header.
    ///
    /// A decode failure still consumes the frame, so the stream stays aligned.
    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        let data = self.read_raw_body().await?;
        self.codec.decode(&data)
    }

    /// Skips the body following the last header.
    pub async fn discard_body(&mut self) -> Result<()> {
        self.read_raw_body().await.map(|_| ())
    }
}

/// Writes `(Header, Body)` pairs as one contiguous write.
pub struct CodecWriter<W> {
    writer: W,
    codec: Codec,
}

impl<W> CodecWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W, codec: Codec) -> Self {
        Self { writer, codec }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Encodes `body` with the connection codec and writes it after `header`.
    pub async fn write<T: Serialize + ?Sized>(&mut self, header: &Header, body: &T) -> Result<()> {
        let body = self.codec.encode(body)?;
        self.write_raw(header, &body).await
    }

    /// Writes `header` followed by an already encoded body.
    pub async fn write_raw(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header = self.codec.encode(header)?;

        let mut buf = Vec::with_capacity(header.len() + body.len() + 8);
        frame::encode_frame(&mut buf, &header)?;
        frame::encode_frame(&mut buf, body)?;

        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write side, signalling end-of-stream to the peer.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
