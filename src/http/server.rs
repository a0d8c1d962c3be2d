//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create one Axum Router per provenance (overlay, funnel)
//! - Wire up middleware (tracing, request ID)
//! - Bind plaintext and TLS listeners
//! - Bound how long a client may take to send its request headers
//! - Apply configuration reloads to the shared dispatcher
//! - Stop accepting and drain on shutdown

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tower::ServiceExt;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::schema::IngressConfig;
use crate::http::proxy::{ProxyDispatcher, Snapshot, SnapshotError};
use crate::http::request::{InboundConnection, UuidRequestId, X_REQUEST_ID};
use crate::identity::IdentitySource;
use crate::lifecycle::Shutdown;
use crate::net::tls::load_tls_config;
use crate::observability::MetricsRecorder;
use crate::routing::Provenance;

/// How long listeners wait for in-flight requests after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("binding {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("loading TLS certificate: {0}")]
    Tls(#[source] std::io::Error),

    #[error("serving: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: ProxyDispatcher,
    pub provenance: Provenance,
    pub tls: bool,
}

/// The ingress: a dispatcher plus the listeners that feed it.
pub struct IngressServer {
    config: IngressConfig,
    dispatcher: ProxyDispatcher,
    identity: IdentitySource,
}

impl IngressServer {
    /// Compile `config` (already validated) into a serving ingress.
    pub fn new(
        config: IngressConfig,
        identity: IdentitySource,
        metrics: Arc<MetricsRecorder>,
    ) -> Result<Self, SnapshotError> {
        let snapshot = Snapshot::from_config(&config, &identity)?;
        Ok(Self {
            config,
            dispatcher: ProxyDispatcher::new(snapshot, metrics),
            identity,
        })
    }

    pub fn dispatcher(&self) -> &ProxyDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &IngressConfig {
        &self.config
    }

    /// The handler for one provenance, with middleware.
    pub fn router(&self, provenance: Provenance, tls: bool) -> Router {
        build_router(AppState {
            dispatcher: self.dispatcher.clone(),
            provenance,
            tls,
        })
    }

    /// Bind every configured listener and load TLS material.
    pub async fn bind(self) -> Result<BoundServer, ServeError> {
        let mut listeners = Vec::new();

        let tls = match &self.config.listener.tls {
            Some(tls) if !tls.cert_path.is_empty() => Some(
                load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))
                    .await
                    .map_err(ServeError::Tls)?,
            ),
            _ => None,
        };

        if !self.config.funnel.only {
            let overlay_tls = if self.config.listener.plaintext {
                None
            } else {
                Some(tls.clone().ok_or_else(missing_tls)?)
            };
            listeners.push(BoundListener::bind(
                Provenance::Overlay,
                &self.config.listener.bind_address,
                overlay_tls,
            )?);
        }
        if self.config.funnel.enabled {
            listeners.push(BoundListener::bind(
                Provenance::Funnel,
                &self.config.funnel.bind_address,
                Some(tls.ok_or_else(missing_tls)?),
            )?);
        }

        Ok(BoundServer {
            server: self,
            listeners,
        })
    }

    /// Bind and serve until `shutdown` fires.
    pub async fn run(
        self,
        updates: Option<mpsc::UnboundedReceiver<IngressConfig>>,
        shutdown: &Shutdown,
    ) -> Result<(), ServeError> {
        self.bind().await?.serve(updates, shutdown).await
    }

    /// Rebuild the snapshot from a reloaded configuration and publish it.
    pub fn apply(&self, config: &IngressConfig) -> Result<(), SnapshotError> {
        if config.listener != self.config.listener || config.funnel != self.config.funnel {
            tracing::warn!("Listener settings changed; restart to apply them");
        }
        let snapshot = Snapshot::from_config(config, &self.identity)?;
        self.dispatcher.publish(snapshot);
        tracing::info!(
            destination = %config.destination,
            prefixes = ?config.routing.prefixes,
            deny_prefixes = ?config.routing.deny_prefixes,
            identity_suppressed = config.identity.suppress,
            "Configuration reloaded"
        );
        Ok(())
    }
}

fn missing_tls() -> ServeError {
    ServeError::Tls(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no certificate configured for a TLS listener",
    ))
}

/// Listeners are bound; nothing is accepted until `serve`.
pub struct BoundServer {
    server: IngressServer,
    listeners: Vec<BoundListener>,
}

struct BoundListener {
    provenance: Provenance,
    addr: SocketAddr,
    listener: std::net::TcpListener,
    tls: Option<RustlsConfig>,
}

impl BoundListener {
    fn bind(provenance: Provenance, addr: &str, tls: Option<RustlsConfig>) -> Result<Self, ServeError> {
        let bind_error = |source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        };
        let parsed: SocketAddr = addr
            .parse()
            .map_err(|e| bind_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        let listener = std::net::TcpListener::bind(parsed).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;
        Ok(Self {
            provenance,
            addr,
            listener,
            tls,
        })
    }
}

impl BoundServer {
    pub fn local_addr(&self, provenance: Provenance) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.provenance == provenance)
            .map(|l| l.addr)
    }

    pub async fn serve(
        self,
        updates: Option<mpsc::UnboundedReceiver<IngressConfig>>,
        shutdown: &Shutdown,
    ) -> Result<(), ServeError> {
        let Self { server, listeners } = self;
        let config = &server.config;

        let addrs: Vec<String> = listeners
            .iter()
            .map(|l| format!("{}={}{}", l.provenance, if l.tls.is_some() { "https://" } else { "http://" }, l.addr))
            .collect();
        tracing::info!(
            name = %config.name,
            listeners = ?addrs,
            destination = %config.destination,
            prefixes = ?config.routing.prefixes,
            deny_prefixes = ?config.routing.deny_prefixes,
            funnel = config.funnel.enabled,
            funnel_only = config.funnel.only,
            read_header_timeout = ?config.listener.read_header_timeout(),
            identity_suppressed = config.identity.suppress,
            "Serving"
        );

        let header_timeout = config.listener.read_header_timeout();
        let mut tasks = JoinSet::new();
        for listener in listeners {
            let router = server.router(listener.provenance, listener.tls.is_some());
            let stop = shutdown.clone();
            let BoundListener {
                provenance,
                addr,
                listener,
                tls,
            } = listener;

            match tls {
                Some(tls) => {
                    let handle = axum_server::Handle::new();
                    let drain = handle.clone();
                    tokio::spawn(async move {
                        stop.wait().await;
                        drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
                    });
                    let mut tls_server = axum_server::from_tcp_rustls(listener, tls).handle(handle);
                    if let Some(timeout) = header_timeout {
                        tls_server
                            .http_builder()
                            .http1()
                            .timer(TokioTimer::new())
                            .header_read_timeout(timeout);
                    }
                    let app = router.into_make_service_with_connect_info::<SocketAddr>();
                    tasks.spawn(async move {
                        tls_server.serve(app).await?;
                        tracing::info!(%provenance, %addr, "Listener stopped");
                        Ok::<_, ServeError>(())
                    });
                }
                None => {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    tasks.spawn(async move {
                        serve_plaintext(listener, router, header_timeout, stop).await;
                        tracing::info!(%provenance, %addr, "Listener stopped");
                        Ok::<_, ServeError>(())
                    });
                }
            }
        }

        let server = Arc::new(server);
        if let Some(mut updates) = updates {
            let server = server.clone();
            let stop = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = updates.recv() => match update {
                            Some(config) => {
                                if let Err(e) = server.apply(&config) {
                                    tracing::error!(error = %e, "Failed to apply reloaded config, keeping current configuration");
                                }
                            }
                            None => break,
                        },
                        _ = stop.wait() => break,
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| ServeError::Io(std::io::Error::other(e)))?;
            if let Err(e) = result {
                tracing::error!(error = %e, "Listener failed");
                shutdown.trigger();
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Accept HTTP/1.1 connections until shutdown, then drain them.
///
/// A client that has not finished its request headers within
/// `header_timeout` is disconnected.
async fn serve_plaintext(
    listener: tokio::net::TcpListener,
    router: Router,
    header_timeout: Option<Duration>,
    shutdown: Shutdown,
) {
    let mut http = hyper::server::conn::http1::Builder::new();
    if let Some(timeout) = header_timeout {
        http.timer(TokioTimer::new()).header_read_timeout(timeout);
    }

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let router = router.clone();
                    let service = hyper::service::service_fn(move |mut request: Request<hyper::body::Incoming>| {
                        request.extensions_mut().insert(ConnectInfo(peer));
                        router.clone().oneshot(request)
                    });
                    let conn = http.serve_connection(TokioIo::new(stream), service);
                    let stop = shutdown.clone();
                    connections.spawn(async move {
                        let mut conn = std::pin::pin!(conn);
                        let finished = tokio::select! {
                            result = conn.as_mut() => Some(result),
                            _ = stop.wait() => None,
                        };
                        let result = match finished {
                            Some(result) => result,
                            None => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = result {
                            tracing::debug!(%peer, error = %e, "Connection closed with error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.wait() => break,
        }
    }
    drop(listener);

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(remaining = connections.len(), "Drain timed out, closing connections");
    }
}

/// Build the Axum router with all middleware layers.
fn build_router(state: AppState) -> Router {
    Router::new()
        .fallback(ingress_handler)
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
}

async fn ingress_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let conn = InboundConnection {
        peer,
        tls: state.tls,
        provenance: state.provenance,
    };
    state.dispatcher.dispatch(request, conn).await
}
