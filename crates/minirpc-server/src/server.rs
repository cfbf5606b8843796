//! Connection serving and request dispatch
//!
//! # Connection lifecycle
//!
//! 1. Read the handshake; a bad frame, magic number or codec closes the connection
//! 2. Loop on `(Header, Body)` pairs until the peer closes or a header read fails
//! 3. Each resolved request runs on its own task; responses share one writer lock
//! 4. Once reading stops, wait for in-flight handlers, then shut the write half

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use minirpc_common::protocol::error::{Result, RpcError};
use minirpc_common::transport::{Codec, CodecReader, CodecWriter};
use minirpc_common::{read_handshake, Header};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::service::{is_exported, MethodType, PreparedCall, Service};

type SharedWriter<S> = Arc<Mutex<CodecWriter<WriteHalf<S>>>>;

/// RPC server holding the registered services.
///
/// Services are registered up front, then the server is shared as `Arc<Server>`.
pub struct Server {
    services: HashMap<String, Service>,
}

impl Server {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Adds a service.
    ///
    /// # Arguments
    ///
    /// * `service` - The service to register
    ///
    /// # Returns
    ///
    /// An error if the name is empty, not exported, or already registered
    pub fn register(&mut self, service: Service) -> Result<()> {
        let name = service.name().to_string();
        if !is_exported(&name) {
            return Err(RpcError::InvalidRequest(format!(
                "rpc server: {:?} is not a valid service name",
                name
            )));
        }
        if self.services.contains_key(&name) {
            return Err(RpcError::InvalidRequest(format!(
                "rpc server: service already defined: {}",
                name
            )));
        }
        tracing::info!(service = %name, methods = service.methods().len(), "registered service");
        self.services.insert(name, service);
        Ok(())
    }

    /// Registered services sorted by name.
    pub fn services(&self) -> Vec<&Service> {
        let mut services: Vec<_> = self.services.values().collect();
        services.sort_by(|a, b| a.name().cmp(b.name()));
        services
    }

    /// Resolves `"Service.Method"` to its method, splitting at the last dot.
    pub fn find_method(&self, service_method: &str) -> std::result::Result<&MethodType, String> {
        let (service_name, method_name) = service_method.rsplit_once('.').ok_or_else(|| {
            format!(
                "rpc server: service/method request ill-formed: {}",
                service_method
            )
        })?;

        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| format!("rpc server: can't find service {}", service_name))?;

        service
            .find_method(method_name)
            .ok_or_else(|| format!("rpc server: can't find method {}", method_name))
    }

    /// Accepts connections until the listener fails, serving each on its own task.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!("rpc server listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await.map_err(|e| {
                tracing::error!("rpc server: accept error: {}", e);
                RpcError::Connection(format!("Failed to accept connection: {}", e))
            })?;
            tracing::debug!(%peer, "accepted connection");

            let server = self.clone();
            tokio::spawn(async move {
                server.serve_conn(stream).await;
            });
        }
    }

    /// Serves one connection until the peer closes it.
    pub async fn serve_conn<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut read_half = BufReader::new(read_half);

        let options = match read_handshake(&mut read_half).await {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!("rpc server: handshake failed: {}", e);
                return;
            }
        };
        tracing::debug!(codec = %options.codec_type, handle_timeout = ?options.handle_timeout, "handshake accepted");

        let codec = Codec::from(options.codec_type);
        let mut reader = CodecReader::new(read_half, codec);
        let writer: SharedWriter<S> = Arc::new(Mutex::new(CodecWriter::new(write_half, codec)));
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) => {
                    if !e.is_eof() {
                        tracing::warn!("rpc server: read header error: {}", e);
                    }
                    break;
                }
            };
            tracing::debug!(seq = header.seq, service_method = %header.service_method, "request");

            // The body frame must be consumed whatever happens to the request
            let body = match reader.read_raw_body().await {
                Ok(body) => body,
                Err(e) => {
                    send_error(&writer, &header, format!("rpc server: read body err: {}", e)).await;
                    continue;
                }
            };

            let call = match self
                .find_method(&header.service_method)
                .and_then(|method| method.prepare(codec, &body))
            {
                Ok(call) => call,
                Err(e) => {
                    send_error(&writer, &header, e).await;
                    continue;
                }
            };

            handlers.spawn(handle_request(
                writer.clone(),
                header,
                call,
                options.handle_timeout,
            ));
            while handlers.try_join_next().is_some() {}
        }

        while handlers.join_next().await.is_some() {}
        let mut writer = writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("rpc server: shutdown error: {}", e);
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a handler and writes its response, bounded by `timeout` unless zero.
async fn handle_request<S>(
    writer: SharedWriter<S>,
    header: Header,
    call: PreparedCall,
    timeout: Duration,
) where
    S: AsyncWrite + Send,
{
    let mut handle = tokio::spawn(call);

    let joined = if timeout.is_zero() {
        (&mut handle).await
    } else {
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                send_error(
                    &writer,
                    &header,
                    format!(
                        "rpc server: request handle timeout: expect within {:?}",
                        timeout
                    ),
                )
                .await;
                return;
            }
        }
    };

    match joined {
        Ok(Ok(reply)) => {
            let response = Header {
                service_method: header.service_method.clone(),
                seq: header.seq,
                error: String::new(),
            };
            if let Err(e) = writer.lock().await.write_raw(&response, &reply).await {
                tracing::warn!(seq = header.seq, "rpc server: write response error: {}", e);
            }
        }
        Ok(Err(e)) => send_error(&writer, &header, e).await,
        Err(e) => {
            tracing::error!(seq = header.seq, "rpc server: handler failed: {}", e);
            send_error(&writer, &header, format!("rpc server: handler failed: {}", e)).await;
        }
    }
}

/// Answers `header` with `error` and an empty body.
async fn send_error<S>(writer: &SharedWriter<S>, header: &Header, error: String)
where
    S: AsyncWrite,
{
    tracing::debug!(seq = header.seq, error = %error, "error response");
    let response = header.with_error(error);
    if let Err(e) = writer.lock().await.write_raw(&response, &[]).await {
        tracing::warn!(seq = header.seq, "rpc server: write response error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirpc_common::{write_handshake, CodecType, Options};
    use tokio::io::{DuplexStream, ReadHalf};

    fn server() -> Arc<Server> {
        let mut server = Server::new();
        server
            .register(
                Service::new("Echo")
                    .method("Say", |s: String| async move { Ok::<_, String>(s) })
                    .method("Sleep", |ms: u64| async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok::<_, String>(ms)
                    }),
            )
            .unwrap();
        Arc::new(server)
    }

    async fn connect(
        server: Arc<Server>,
        options: Options,
    ) -> (
        CodecWriter<WriteHalf<DuplexStream>>,
        CodecReader<ReadHalf<DuplexStream>>,
    ) {
        let (client, remote) = tokio::io::duplex(64 * 1024);
        tokio::spawn(server.serve_conn(remote));

        let (read_half, mut write_half) = tokio::io::split(client);
        write_handshake(&mut write_half, &options).await.unwrap();
        let codec = Codec::from(options.codec_type);
        (
            CodecWriter::new(write_half, codec),
            CodecReader::new(read_half, codec),
        )
    }

    #[test]
    fn test_register_rejections() {
        let mut server = Server::new();
        assert!(server.register(Service::new("")).is_err());
        assert!(server.register(Service::new("lower")).is_err());
        assert!(server.register(Service::new("Upper")).is_ok());
        assert!(server.register(Service::new("Upper")).is_err());
    }

    #[test]
    fn test_find_method_messages() {
        let server = server();
        assert!(server.find_method("Echo.Say").is_ok());

        let err = server.find_method("EchoSay").err().unwrap();
        assert_eq!(err, "rpc server: service/method request ill-formed: EchoSay");

        let err = server.find_method("Nope.Say").err().unwrap();
        assert_eq!(err, "rpc server: can't find service Nope");

        let err = server.find_method("Echo.Shout").err().unwrap();
        assert_eq!(err, "rpc server: can't find method Shout");
    }

    #[tokio::test]
    async fn test_request_response() {
        let (mut writer, mut reader) = connect(server(), Options::default()).await;

        writer.write(&Header::request("Echo.Say", 1), "hello").await.unwrap();
        let header = reader.read_header().await.unwrap();
        assert_eq!(header.seq, 1);
        assert!(!header.is_error());
        let reply: String = reader.read_body().await.unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn test_lookup_error_keeps_connection() {
        let (mut writer, mut reader) =
            connect(server(), Options::default().with_codec(CodecType::Postcard)).await;

        writer.write(&Header::request("Echo.Shout", 1), "x").await.unwrap();
        let header = reader.read_header().await.unwrap();
        assert_eq!(header.error, "rpc server: can't find method Shout");
        reader.discard_body().await.unwrap();

        writer.write(&Header::request("Echo.Say", 2), "still here").await.unwrap();
        let header = reader.read_header().await.unwrap();
        assert_eq!(header.seq, 2);
        let reply: String = reader.read_body().await.unwrap();
        assert_eq!(reply, "still here");
    }

    #[tokio::test]
    async fn test_bad_body_answered_per_frame() {
        let (mut writer, mut reader) = connect(server(), Options::default()).await;

        writer
            .write_raw(&Header::request("Echo.Sleep", 1), b"not a number")
            .await
            .unwrap();
        let header = reader.read_header().await.unwrap();
        assert_eq!(header.seq, 1);
        assert!(header.is_error());
        reader.discard_body().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_timeout() {
        let options = Options::default().with_handle_timeout(Duration::from_millis(50));
        let (mut writer, mut reader) = connect(server(), options).await;

        writer.write(&Header::request("Echo.Sleep", 7), &1000u64).await.unwrap();
        let header = reader.read_header().await.unwrap();
        assert_eq!(header.seq, 7);
        assert!(header.error.contains("request handle timeout: expect within"));
        reader.discard_body().await.unwrap();
    }

    #[tokio::test]
    async fn test_responses_out_of_order() {
        let (mut writer, mut reader) = connect(server(), Options::default()).await;

        writer.write(&Header::request("Echo.Sleep", 1), &200u64).await.unwrap();
        writer.write(&Header::request("Echo.Sleep", 2), &10u64).await.unwrap();

        let first = reader.read_header().await.unwrap();
        let _: u64 = reader.read_body().await.unwrap();
        let second = reader.read_header().await.unwrap();
        let _: u64 = reader.read_body().await.unwrap();
        assert_eq!((first.seq, second.seq), (2, 1));
    }

    #[tokio::test]
    async fn test_bad_magic_closes_connection() {
        let options = Options {
            magic_number: 0x1234,
            ..Options::default()
        };
        let (mut writer, mut reader) = connect(server(), options).await;

        // The server hangs up without reading requests
        let _ = writer.write(&Header::request("Echo.Say", 1), "hi").await;
        assert!(reader.read_header().await.is_err());
    }

    #[tokio::test]
    async fn test_close_waits_for_inflight() {
        let (client, remote) = tokio::io::duplex(64 * 1024);
        let serving = tokio::spawn(server().serve_conn(remote));

        let (read_half, mut write_half) = tokio::io::split(client);
        write_handshake(&mut write_half, &Options::default()).await.unwrap();
        let codec = Codec::default();
        let mut writer = CodecWriter::new(write_half, codec);
        let mut reader = CodecReader::new(read_half, codec);

        writer.write(&Header::request("Echo.Sleep", 1), &50u64).await.unwrap();
        writer.shutdown().await.unwrap();

        let header = reader.read_header().await.unwrap();
        assert_eq!(header.seq, 1);
        let reply: u64 = reader.read_body().await.unwrap();
        assert_eq!(reply, 50);
        serving.await.unwrap();
        assert!(reader.read_header().await.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn test_accept_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server().accept(listener));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_handshake(&mut write_half, &Options::default()).await.unwrap();
        let mut writer = CodecWriter::new(write_half, Codec::default());
        let mut reader = CodecReader::new(read_half, Codec::default());

        writer.write(&Header::request("Echo.Say", 3), "tcp").await.unwrap();
        assert_eq!(reader.read_header().await.unwrap().seq, 3);
        let reply: String = reader.read_body().await.unwrap();
        assert_eq!(reply, "tcp");
        let _ = writer.shutdown().await;
    }
}
