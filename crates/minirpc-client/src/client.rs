//! Multiplexing RPC client
//!
//! One [`Client`] owns one connection. Any number of calls may be outstanding;
//! each is registered under a fresh sequence number and completed by the
//! receive task when the response carrying that number arrives.
//!
//! # Locking
//!
//! - `sending` serializes request writes so header/body pairs never interleave
//! - `state` guards the sequence counter, the pending table and the close flags.
//!   It is a plain mutex and is never held across an await point
//!
//! When both are needed, `sending` is taken first.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::{header, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use minirpc_common::protocol::error::{Result, RpcError};
use minirpc_common::transport::{Codec, CodecReader, CodecWriter};
use minirpc_common::{write_handshake, Header, Options};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type BoxedWriter = CodecWriter<Box<dyn AsyncWrite + Send + Unpin>>;
type Completion = oneshot::Sender<Result<Vec<u8>>>;

struct State {
    seq: u64,
    pending: HashMap<u64, Completion>,
    /// Set by `close`
    closing: bool,
    /// Set when the receive task stops
    shutdown: bool,
}

struct Inner {
    sending: Mutex<BoxedWriter>,
    state: std::sync::Mutex<State>,
    codec: Codec,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_call(&self, completion: Completion) -> Result<u64> {
        let mut state = self.state();
        if state.closing || state.shutdown {
            return Err(RpcError::Shutdown);
        }
        let seq = state.seq;
        state.pending.insert(seq, completion);
        state.seq += 1;
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<Completion> {
        self.state().pending.remove(&seq)
    }

    /// Writes one request. A write failure completes the call with that error.
    async fn send(&self, seq: u64, service_method: String, body: Vec<u8>) {
        let mut sending = self.sending.lock().await;
        let header = Header::request(service_method, seq);
        if let Err(e) = sending.write_raw(&header, &body).await {
            tracing::debug!(seq, service_method = %header.service_method, "rpc client: write failed: {}", e);
            if let Some(completion) = self.remove_call(seq) {
                let _ = completion.send(Err(e));
            }
        }
    }

    /// Fails every pending call and refuses new ones.
    async fn terminate(&self, cause: RpcError) {
        let _sending = self.sending.lock().await;
        let mut state = self.state();
        state.shutdown = true;
        if !state.pending.is_empty() {
            tracing::debug!(pending = state.pending.len(), "rpc client: terminating: {}", cause);
        }
        for (_, completion) in state.pending.drain() {
            let _ = completion.send(Err(RpcError::Shutdown));
        }
    }
}

/// An outstanding call.
///
/// Completed exactly once, by a response, a write failure or connection shutdown.
/// Dropping an uncompleted call withdraws it from the pending table; a reply
/// arriving later is discarded.
pub struct Call<R> {
    seq: u64,
    service_method: String,
    codec: Codec,
    done: oneshot::Receiver<Result<Vec<u8>>>,
    client: Weak<Inner>,
    _reply: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned> Call<R> {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Waits for completion and decodes the reply.
    pub async fn done(mut self) -> Result<R> {
        let body = (&mut self.done).await.map_err(|_| RpcError::Shutdown)??;
        self.codec.decode(&body)
    }
}

impl<R> Drop for Call<R> {
    fn drop(&mut self) {
        // Sequence numbers are never reused, so this is a no-op for completed calls
        if let Some(inner) = self.client.upgrade() {
            inner.remove_call(self.seq);
        }
    }
}

/// RPC client over a single connection.
pub struct Client {
    inner: Arc<Inner>,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Sends the handshake on `stream` and starts receiving responses.
    ///
    /// # Arguments
    ///
    /// * `stream` - An established connection (TCP, an upgraded HTTP tunnel, ...)
    /// * `options` - Codec and handle timeout announced to the server
    ///
    /// # Returns
    ///
    /// The client, or the error that prevented writing the handshake
    pub async fn new<S>(stream: S, options: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        write_handshake(&mut write_half, &options).await?;

        let codec = Codec::from(options.codec_type);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        let inner = Arc::new(Inner {
            sending: Mutex::new(CodecWriter::new(writer, codec)),
            state: std::sync::Mutex::new(State {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            codec,
        });

        let reader = CodecReader::new(BufReader::new(read_half), codec);
        let receiver = tokio::spawn(receive(inner.clone(), reader));

        Ok(Self { inner, receiver })
    }

    /// Sends a request without waiting for its reply.
    ///
    /// A write failure completes the returned call with that error. Fails with
    /// [`RpcError::Shutdown`] once the client is closed or its connection is gone,
    /// and with the codec error if `args` cannot be encoded.
    ///
    /// The write runs on its own task, so dropping this future never leaves a
    /// partial frame on the connection.
    pub async fn go<A, R>(&self, service_method: &str, args: &A) -> Result<Call<R>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = self.inner.codec.encode(args)?;
        let (completion, done) = oneshot::channel();
        let seq = self.inner.register_call(completion)?;

        let call = Call {
            seq,
            service_method: service_method.to_string(),
            codec: self.inner.codec,
            done,
            client: Arc::downgrade(&self.inner),
            _reply: PhantomData,
        };

        let inner = self.inner.clone();
        let service_method = call.service_method.clone();
        let write = tokio::spawn(async move { inner.send(seq, service_method, body).await });
        if let Err(e) = write.await {
            if let Some(completion) = self.inner.remove_call(seq) {
                let _ = completion.send(Err(RpcError::Connection(format!(
                    "write task failed: {}",
                    e
                ))));
            }
        }

        Ok(call)
    }

    /// Calls `service_method` and waits for the reply without a deadline.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.go(service_method, args).await?.done().await
    }

    /// Calls `service_method`, giving up with [`RpcError::CallTimeout`] after `timeout`.
    ///
    /// A reply arriving after the deadline is discarded.
    pub async fn call_timeout<A, R>(
        &self,
        timeout: Duration,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let call = self.go(service_method, args).await?;
        tokio::time::timeout(timeout, call.done())
            .await
            .map_err(|_| RpcError::CallTimeout(timeout))?
    }

    /// Calls `service_method`, giving up with [`RpcError::Cancelled`] once `token` fires.
    pub async fn call_cancellable<A, R>(
        &self,
        token: &CancellationToken,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if token.is_cancelled() {
            return Err(RpcError::Cancelled);
        }

        let call = self.go(service_method, args).await?;
        tokio::select! {
            result = call.done() => result,
            _ = token.cancelled() => Err(RpcError::Cancelled),
        }
    }

    /// Shuts the write half of the connection.
    ///
    /// Calls already sent still receive their replies. A second close fails with
    /// [`RpcError::Shutdown`].
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        self.inner.sending.lock().await.shutdown().await
    }

    /// True until the client is closed or its connection fails.
    pub async fn is_available(&self) -> bool {
        let state = self.inner.state();
        !state.closing && !state.shutdown
    }

    /// Number of calls sent and not yet completed, timed out or cancelled.
    pub fn pending_calls(&self) -> usize {
        self.inner.state().pending.len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

/// Dispatches responses to pending calls until the connection fails.
async fn receive<R>(inner: Arc<Inner>, mut reader: CodecReader<R>)
where
    R: AsyncRead + Unpin,
{
    let cause = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(e) => break e,
        };

        let completion = inner.remove_call(header.seq);
        let result = match completion {
            // Cancelled, timed out, or already failed on write
            None => reader.discard_body().await,
            Some(completion) if header.is_error() => {
                let result = reader.discard_body().await;
                let _ = completion.send(Err(RpcError::Remote(header.error)));
                result
            }
            Some(completion) => match reader.read_raw_body().await {
                Ok(body) => {
                    let _ = completion.send(Ok(body));
                    Ok(())
                }
                Err(e) => {
                    let _ = completion.send(Err(RpcError::Protocol(format!(
                        "reading body: {}",
                        e
                    ))));
                    Err(e)
                }
            },
        };

        if let Err(e) = result {
            break e;
        }
    };

    inner.terminate(cause).await;
}

/// Runs `connect` bounded by `timeout`, unless it is zero.
async fn with_connect_timeout<F>(timeout: Duration, connect: F) -> Result<Client>
where
    F: Future<Output = Result<Client>>,
{
    if timeout.is_zero() {
        return connect.await;
    }
    tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| RpcError::ConnectTimeout(timeout))?
}

/// Connects over TCP.
///
/// The connect and the handshake together are bounded by `options.connect_timeout`.
pub async fn dial(addr: &str, options: Options) -> Result<Client> {
    let timeout = options.connect_timeout;
    with_connect_timeout(timeout, async move {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            RpcError::Connection(format!("Failed to connect to {}: {}", addr, e))
        })?;
        stream.set_nodelay(true)?;
        Client::new(stream, options).await
    })
    .await
}

/// Connects through an HTTP `CONNECT` tunnel.
///
/// The connect, the HTTP exchange and the handshake together are bounded by
/// `options.connect_timeout`.
pub async fn dial_http(addr: &str, options: Options) -> Result<Client> {
    let timeout = options.connect_timeout;
    with_connect_timeout(timeout, async move {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            RpcError::Connection(format!("Failed to connect to {}: {}", addr, e))
        })?;

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!("rpc client: HTTP connection error: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::CONNECT)
            .uri(addr)
            .header(header::HOST, addr)
            .body(Empty::<Bytes>::new())?;
        let response = sender.send_request(request).await?;
        if response.status() != StatusCode::OK {
            return Err(RpcError::Connection(format!(
                "unexpected HTTP response: {}",
                response.status()
            )));
        }

        let upgraded = hyper::upgrade::on(response).await?;
        Client::new(TokioIo::new(upgraded), options).await
    })
    .await
}

/// Connects to `"protocol@addr"`, where protocol is `tcp` or `http`.
///
/// A bare `"addr"` is dialed over TCP.
pub async fn xdial(rpc_addr: &str, options: Options) -> Result<Client> {
    match rpc_addr.split_once('@') {
        Some(("tcp", addr)) => dial(addr, options).await,
        Some(("http", addr)) => dial_http(addr, options).await,
        Some((protocol, _)) => Err(RpcError::InvalidRequest(format!(
            "rpc client: unsupported protocol {} in {}",
            protocol, rpc_addr
        ))),
        None => dial(rpc_addr, options).await,
    }
}
