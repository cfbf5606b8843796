use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid magic number {0:#x}")]
    InvalidMagicNumber(u32),

    #[error("Invalid codec type {0}")]
    UnsupportedCodec(String),

    #[error("Frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    /// Failure reported by the remote handler through `Header::error`.
    #[error("{0}")]
    Remote(String),

    #[error("Connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Call failed: deadline exceeded after {0:?}")]
    CallTimeout(Duration),

    #[error("Call failed: cancelled")]
    Cancelled,

    #[error("Connection is shut down")]
    Shutdown,

    #[error("No available servers")]
    NoAvailableServer,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Registry error: {0}")]
    Registry(String),
}

impl RpcError {
    /// True when the error came from the peer closing the stream at a frame boundary.
    pub fn is_eof(&self) -> bool {
        matches!(self, RpcError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

impl From<std::net::AddrParseError> for RpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        RpcError::InvalidRequest(err.to_string())
    }
}

impl From<hyper::Error> for RpcError {
    fn from(err: hyper::Error) -> Self {
        RpcError::Transport(err.to_string())
    }
}

impl From<hyper::http::Error> for RpcError {
    fn from(err: hyper::http::Error) -> Self {
        RpcError::Transport(err.to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for RpcError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        RpcError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
