//! Upstream transports.
//!
//! # Responsibilities
//! - Carry one rewritten request to the upstream and return its response
//! - Dial the URL authority, a fixed TCP address, or a UNIX socket
//! - Reach `https` upstreams with optional certificate checks
//!
//! # Design Decisions
//! - Exactly one attempt per request; no retries, no balancing
//! - Plain HTTP uses a pooled hyper client
//! - UNIX sockets use one HTTP/1.1 connection per request
//! - Redirects are passed back to the caller, never followed

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, Request, Response, Uri};
use futures_util::future::BoxFuture;
use futures_util::{stream, StreamExt};
use hyper_util::{
    client::legacy::{
        connect::{Connect, HttpConnector},
        Client,
    },
    rt::{TokioExecutor, TokioIo},
};
use tokio::net::{TcpStream, UnixStream};
use url::Url;

use crate::config::schema::UpstreamConfig;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connecting to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("upstream protocol error: {0}")]
    Protocol(#[from] hyper::Error),

    #[error("upstream request failed: {0}")]
    Https(#[from] reqwest::Error),

    #[error("invalid upstream uri: {0}")]
    InvalidUri(#[from] axum::http::uri::InvalidUri),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(#[from] axum::http::Error),
}

/// Sends a request to the configured upstream.
pub trait Transport: Send + Sync {
    fn round_trip(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>>;
}

/// Pick the transport for a destination and upstream dialing options.
pub fn build_transport(
    upstream: &UpstreamConfig,
    destination: &Url,
) -> Result<Arc<dyn Transport>, TransportError> {
    if !upstream.unix_addr.is_empty() {
        return Ok(Arc::new(UnixTransport::new(&upstream.unix_addr)));
    }
    if destination.scheme() == "https" {
        let resolve = match (destination.host_str(), upstream.tcp_addr.parse::<SocketAddr>()) {
            (Some(host), Ok(addr)) => Some((host.to_string(), addr)),
            _ => None,
        };
        return Ok(Arc::new(HttpsTransport::new(upstream.insecure_https, resolve)?));
    }
    if !upstream.tcp_addr.is_empty() {
        return Ok(Arc::new(HttpTransport::fixed(upstream.tcp_addr.clone())));
    }
    Ok(Arc::new(HttpTransport::new()))
}

/// Pooled plaintext HTTP client.
#[derive(Clone)]
pub struct HttpTransport<C = HttpConnector> {
    client: Client<C, Body>,
}

impl HttpTransport<HttpConnector> {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }
}

impl Default for HttpTransport<HttpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport<FixedTcpConnector> {
    /// Dial `addr` for every request, whatever the URL authority says.
    pub fn fixed(addr: String) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(FixedTcpConnector { addr: Arc::from(addr) }),
        }
    }
}

impl<C> Transport for HttpTransport<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    fn round_trip(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
        let pending = self.client.request(request);
        Box::pin(async move {
            let response = pending.await?;
            Ok(response.map(Body::new))
        })
    }
}

/// Connector that ignores the URI and dials one TCP address.
#[derive(Debug, Clone)]
pub struct FixedTcpConnector {
    addr: Arc<str>,
}

impl tower::Service<Uri> for FixedTcpConnector {
    type Response = TokioIo<TcpStream>;
    type Error = std::io::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        let addr = self.addr.clone();
        Box::pin(async move {
            let stream = TcpStream::connect(&*addr).await?;
            stream.set_nodelay(true)?;
            Ok(TokioIo::new(stream))
        })
    }
}

/// HTTP/1.1 over a UNIX domain socket.
#[derive(Debug, Clone)]
pub struct UnixTransport {
    path: PathBuf,
}

impl UnixTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn send(&self, mut request: Request<Body>) -> Result<Response<Body>, TransportError> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|source| TransportError::Connect {
                target: format!("unix:{}", self.path.display()),
                source,
            })?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Upstream connection closed with error");
            }
        });

        if !request.headers().contains_key(header::HOST) {
            if let Some(authority) = request.uri().authority() {
                if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                    request.headers_mut().insert(header::HOST, host);
                }
            }
        }
        let origin_form: Uri = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .parse()?;
        *request.uri_mut() = origin_form;

        let response = sender.send_request(request).await?;
        Ok(response.map(Body::new))
    }
}

impl Transport for UnixTransport {
    fn round_trip(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
        Box::pin(self.send(request))
    }
}

/// TLS upstreams, via reqwest.
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    client: reqwest::Client,
}

impl HttpsTransport {
    /// `resolve` pins the destination host to a fixed socket address.
    pub fn new(insecure: bool, resolve: Option<(String, SocketAddr)>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .danger_accept_invalid_certs(insecure);
        if let Some((host, addr)) = resolve {
            builder = builder.resolve(&host, addr);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        let (parts, body) = request.into_parts();

        // axum bodies are not Sync; reqwest wants a Sync stream.
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, axum::Error>>(4);
        tokio::spawn(async move {
            let mut chunks = body.into_data_stream();
            while let Some(chunk) = chunks.next().await {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        let chunks = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|chunk| (chunk, rx)) });

        let upstream = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(reqwest::Body::wrap_stream(chunks))
            .send()
            .await?;

        let status = upstream.status();
        let version = upstream.version();
        let headers = upstream.headers().clone();
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

impl Transport for HttpsTransport {
    fn round_trip(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
        Box::pin(self.send(request))
    }
}
