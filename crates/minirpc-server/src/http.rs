//! HTTP front end for the RPC server
//!
//! Serves HTTP/1.1 on a listener:
//! - `CONNECT` answers `200 Connected to minirpc`, then the upgraded stream is
//!   served exactly like a raw TCP connection
//! - `GET /debug/minirpc` lists services with per-method call counts as JSON
//! - anything else is 404 (unknown path) or 405 (wrong method)

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::ext::ReasonPhrase;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use minirpc_common::protocol::error::Result;
use minirpc_common::{CONNECTED_REASON, DEFAULT_DEBUG_PATH};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::server::Server;

#[derive(Debug, Serialize)]
pub struct MethodInfo {
    pub name: String,
    pub arg_type: String,
    pub reply_type: String,
    pub num_calls: u64,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub methods: Vec<MethodInfo>,
}

impl Server {
    /// Snapshot of every registered service for the debug endpoint.
    pub fn debug_info(&self) -> Vec<ServiceInfo> {
        self.services()
            .into_iter()
            .map(|service| ServiceInfo {
                name: service.name().to_string(),
                methods: service
                    .methods()
                    .into_iter()
                    .map(|method| MethodInfo {
                        name: method.name().to_string(),
                        arg_type: method.arg_type().to_string(),
                        reply_type: method.reply_type().to_string(),
                        num_calls: method.num_calls(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Serves the HTTP front end until the listener fails.
    ///
    /// # Arguments
    ///
    /// * `listener` - A bound listener; each accepted connection gets its own task
    ///
    /// # Returns
    ///
    /// An error when accepting fails
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!("rpc server listening for HTTP on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "accepted HTTP connection");

            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle_http(req)) }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    tracing::debug!("Error serving HTTP connection: {}", err);
                }
            });
        }
    }

    fn handle_http(self: Arc<Self>, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.method() == Method::CONNECT {
            let server = self.clone();
            tokio::spawn(async move {
                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => server.serve_conn(TokioIo::new(upgraded)).await,
                    Err(e) => tracing::warn!("rpc server: CONNECT upgrade failed: {}", e),
                }
            });

            let mut response = Response::new(Full::new(Bytes::new()));
            response
                .extensions_mut()
                .insert(ReasonPhrase::from_static(CONNECTED_REASON.as_bytes()));
            return response;
        }

        if req.uri().path() != DEFAULT_DEBUG_PATH {
            return status_response(StatusCode::NOT_FOUND, "404 page not found\n");
        }
        if req.method() != Method::GET {
            return status_response(StatusCode::METHOD_NOT_ALLOWED, "405 must CONNECT\n");
        }

        match serde_json::to_vec(&self.debug_info()) {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("application/json"),
                );
                response
            }
            Err(e) => {
                tracing::error!("Failed to encode debug info: {}", e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR, "encode error\n")
            }
        }
    }
}

fn status_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
