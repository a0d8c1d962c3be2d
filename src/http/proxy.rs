//! Per-request dispatch: match, rewrite, forward, observe.
//!
//! # Responsibilities
//! - Hold the current routing snapshot behind an atomic pointer
//! - Run one request through the prefix table, rewriter and transport
//! - Map denials to 404 and forwarding failures to 502
//! - Report responses and failures to the metrics recorder
//!
//! # Design Decisions
//! - Each request loads the snapshot once and finishes on it
//! - Exactly one forwarding attempt per request
//! - A denied request never reaches the rewriter or the transport

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, Response};

use crate::config::schema::IngressConfig;
use crate::config::validation::{
    parse_destination, parse_prefix_table, parse_static_headers, ValidationError,
};
use crate::http::request::{InboundConnection, RequestRewriter};
use crate::http::response::{bad_gateway, not_found};
use crate::identity::IdentitySource;
use crate::net::{build_transport, Transport, TransportError};
use crate::observability::MetricsRecorder;
use crate::routing::{MatchOutcome, PrefixTable, RequestPath};
use crate::security::headers::strip_hop_by_hop;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid configuration: {0:?}")]
    Config(Vec<ValidationError>),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Everything the request path needs, compiled from one configuration.
pub struct Snapshot {
    pub table: PrefixTable,
    pub strip_prefix: bool,
    pub rewriter: RequestRewriter,
    pub transport: Arc<dyn Transport>,
}

impl Snapshot {
    pub fn new(
        table: PrefixTable,
        strip_prefix: bool,
        rewriter: RequestRewriter,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            table,
            strip_prefix,
            rewriter,
            transport,
        }
    }

    /// Compile a validated configuration.
    pub fn from_config(config: &IngressConfig, identity: &IdentitySource) -> Result<Self, SnapshotError> {
        let destination =
            parse_destination(&config.destination).map_err(|e| SnapshotError::Config(vec![e]))?;
        let table = parse_prefix_table(&config.routing.prefixes, &config.routing.deny_prefixes)
            .map_err(SnapshotError::Config)?;
        let static_headers =
            parse_static_headers(&config.headers.upstream).map_err(SnapshotError::Config)?;

        let identity = identity.resolver(&config.identity);
        let transport = build_transport(&config.upstream, &destination)?;
        let rewriter = RequestRewriter::new(
            destination,
            config.headers.recommended,
            static_headers,
            identity,
        );

        Ok(Self::new(table, config.routing.strip_prefix, rewriter, transport))
    }
}

/// The end-to-end handler shared by every listener.
#[derive(Clone)]
pub struct ProxyDispatcher {
    snapshot: Arc<ArcSwap<Snapshot>>,
    metrics: Arc<MetricsRecorder>,
}

impl ProxyDispatcher {
    pub fn new(snapshot: Snapshot, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(snapshot)),
            metrics,
        }
    }

    /// Make `snapshot` visible to every request that starts after this call.
    pub fn publish(&self, snapshot: Snapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub async fn dispatch(&self, request: Request<Body>, conn: InboundConnection) -> Response<Body> {
        let snapshot = self.snapshot.load_full();
        let path = RequestPath::from_uri(request.uri());

        let forwarded = match snapshot.table.evaluate(&path, conn.provenance) {
            MatchOutcome::Passthrough => path,
            MatchOutcome::Allowed(stripped) if snapshot.strip_prefix => stripped.into(),
            MatchOutcome::Allowed(_) => path,
            MatchOutcome::Denied(reason) => {
                tracing::warn!(
                    url = %request.uri(),
                    provenance = %conn.provenance,
                    prefixes = %snapshot.table,
                    reason = %reason,
                    "Request denied"
                );
                return not_found();
            }
        };

        let (outbound, ctx) = match snapshot.rewriter.rewrite(request, &forwarded, &conn).await {
            Ok(rewritten) => rewritten,
            Err(e) => {
                self.metrics.record_error();
                tracing::error!(error = %e, path = %forwarded.escaped(), "Could not build upstream request");
                return bad_gateway();
            }
        };

        match snapshot.transport.round_trip(outbound).await {
            Ok(mut response) => {
                self.metrics.observe(&response, &ctx);
                strip_hop_by_hop(response.headers_mut());
                response
            }
            Err(e) => {
                self.metrics.record_error();
                tracing::error!(
                    error = %e,
                    original = %ctx.original_uri,
                    rewritten = %ctx.rewritten_uri,
                    duration_ms = ctx.start.elapsed().as_millis() as u64,
                    "Proxy error"
                );
                bad_gateway()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityResolver;
    use crate::observability::StatusClass;
    use crate::routing::{PrefixRule, Provenance};
    use crate::security::headers::StaticHeaders;
    use axum::http::{StatusCode, Uri};
    use futures_util::future::BoxFuture;
    use std::sync::Mutex;
    use url::Url;

    /// Records every request and answers with a fixed status.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Uri>>,
    }

    impl Transport for Recording {
        fn round_trip(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
            self.seen.lock().unwrap().push(request.uri().clone());
            Box::pin(async {
                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header("connection", "close")
                    .body(Body::from("ok"))
                    .unwrap())
            })
        }
    }

    struct Refusing;

    impl Transport for Refusing {
        fn round_trip(&self, _request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
            Box::pin(async {
                Err(TransportError::Connect {
                    target: "127.0.0.1:1".into(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                })
            })
        }
    }

    fn snapshot(allow: &[&str], deny: &[&str], strip: bool, transport: Arc<dyn Transport>) -> Snapshot {
        let parse = |specs: &[&str]| -> Vec<PrefixRule> { specs.iter().map(|s| s.parse().unwrap()).collect() };
        let rewriter = RequestRewriter::new(
            Url::parse("http://127.0.0.1:3000/").unwrap(),
            true,
            StaticHeaders::default(),
            IdentityResolver::disabled(),
        );
        Snapshot::new(PrefixTable::new(parse(allow), parse(deny)), strip, rewriter, transport)
    }

    fn conn(provenance: Provenance) -> InboundConnection {
        InboundConnection {
            peer: "100.64.0.7:51234".parse().unwrap(),
            tls: true,
            provenance,
        }
    }

    fn get(path: &str) -> Request<Body> {
        Request::get(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_denied_never_forwarded() {
        let transport = Arc::new(Recording::default());
        let dispatcher = ProxyDispatcher::new(
            snapshot(&["/api"], &[], true, transport.clone()),
            Arc::new(MetricsRecorder::new()),
        );

        let response = dispatcher.dispatch(get("/other"), conn(Provenance::Overlay)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(transport.seen.lock().unwrap().is_empty());
        assert_eq!(dispatcher.metrics().total_responses(), 0);
        assert_eq!(dispatcher.metrics().proxy_errors(), 0);
    }

    #[tokio::test]
    async fn test_strip_on_match() {
        let transport = Arc::new(Recording::default());
        let dispatcher = ProxyDispatcher::new(
            snapshot(&["/api"], &[], true, transport.clone()),
            Arc::new(MetricsRecorder::new()),
        );
        let response = dispatcher.dispatch(get("/api/push"), conn(Provenance::Overlay)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("connection").is_none());

        dispatcher.publish(snapshot(&["/api"], &[], false, transport.clone()));
        dispatcher.dispatch(get("/api/push"), conn(Provenance::Overlay)).await;

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].path(), "/push");
        assert_eq!(seen[1].path(), "/api/push");
        assert_eq!(dispatcher.metrics().responses(StatusClass::Success), 2);
    }

    #[tokio::test]
    async fn test_empty_table_allows_everything() {
        let transport = Arc::new(Recording::default());
        let dispatcher = ProxyDispatcher::new(
            snapshot(&[], &[], true, transport.clone()),
            Arc::new(MetricsRecorder::new()),
        );
        for provenance in [Provenance::Overlay, Provenance::Funnel] {
            let response = dispatcher.dispatch(get("/anything/at/all"), conn(provenance)).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(transport.seen.lock().unwrap()[0].path(), "/anything/at/all");
    }

    #[tokio::test]
    async fn test_provenance_gating() {
        let transport = Arc::new(Recording::default());
        let dispatcher = ProxyDispatcher::new(
            snapshot(&["funnel:/hook", "tailnet:/admin"], &[], true, transport.clone()),
            Arc::new(MetricsRecorder::new()),
        );

        let status = |r: Response<Body>| r.status();
        assert_eq!(status(dispatcher.dispatch(get("/hook/x"), conn(Provenance::Funnel)).await), StatusCode::OK);
        assert_eq!(status(dispatcher.dispatch(get("/hook/x"), conn(Provenance::Overlay)).await), StatusCode::NOT_FOUND);
        assert_eq!(status(dispatcher.dispatch(get("/admin/x"), conn(Provenance::Overlay)).await), StatusCode::OK);
        assert_eq!(status(dispatcher.dispatch(get("/admin/x"), conn(Provenance::Funnel)).await), StatusCode::NOT_FOUND);
        assert_eq!(transport.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deny_rules_checked_first() {
        let transport = Arc::new(Recording::default());
        let dispatcher = ProxyDispatcher::new(
            snapshot(&["/api"], &["/api/internal"], true, transport.clone()),
            Arc::new(MetricsRecorder::new()),
        );
        let response = dispatcher.dispatch(get("/api/internal/x"), conn(Provenance::Overlay)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = dispatcher.dispatch(get("/api/public"), conn(Provenance::Overlay)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_one_bad_gateway() {
        let dispatcher = ProxyDispatcher::new(
            snapshot(&[], &[], true, Arc::new(Refusing)),
            Arc::new(MetricsRecorder::new()),
        );
        let response = dispatcher.dispatch(get("/"), conn(Provenance::Overlay)).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(dispatcher.metrics().proxy_errors(), 1);
        assert_eq!(dispatcher.metrics().total_responses(), 0);
    }

    #[test]
    fn test_snapshot_from_config() {
        let config = IngressConfig {
            name: "grafana".into(),
            destination: "http://127.0.0.1:3000/".into(),
            routing: crate::config::schema::RoutingConfig {
                prefixes: vec!["/api".into()],
                deny_prefixes: vec!["/api/internal".into()],
                strip_prefix: false,
            },
            ..IngressConfig::default()
        };
        let snapshot = Snapshot::from_config(&config, &IdentitySource::Disabled).unwrap();
        assert_eq!(snapshot.table.to_string(), "[/api] deny [/api/internal]");
        assert!(!snapshot.strip_prefix);
        assert_eq!(snapshot.rewriter.destination().as_str(), "http://127.0.0.1:3000/");
    }
}
