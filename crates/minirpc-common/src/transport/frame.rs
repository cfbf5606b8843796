//! Length-prefixed framing
//!
//! Wire format: `[4-byte length as u32 big-endian] + [payload]`

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::error::{Result, RpcError};

/// Maximum frame payload (100 MB), prevents allocation of excessively large buffers.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Appends one length-prefixed frame to `buf`.
pub fn encode_frame(buf: &mut Vec<u8>, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(payload.len(), MAX_FRAME_SIZE));
    }
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Reads one frame payload.
///
/// A peer closing the stream before the length prefix yields an `Io` error of
/// kind `UnexpectedEof` (see [`RpcError::is_eof`]).
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
