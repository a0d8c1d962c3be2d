//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use tailnet_ingress::config::schema::IngressConfig;
use tailnet_ingress::identity::{IdentitySource, WhoIs};
use tailnet_ingress::observability::MetricsRecorder;
use tailnet_ingress::routing::Provenance;
use tailnet_ingress::IngressServer;

/// What the mock upstream saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Echo {
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Echo {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

async fn echo(request: Request<Body>) -> Json<Echo> {
    Json(Echo {
        path: request.uri().path().to_string(),
        query: request.uri().query().map(str::to_string),
        headers: request
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect(),
    })
}

pub fn echo_router() -> Router {
    Router::new().fallback(echo)
}

/// Start a mock upstream that answers every request with an `Echo`.
pub async fn start_echo_upstream() -> SocketAddr {
    serve(echo_router()).await
}

/// Serve `router` on an ephemeral port with peer addresses attached.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

/// A minimal valid config pointing at `destination`.
pub fn config(destination: &str) -> IngressConfig {
    let mut config = IngressConfig {
        name: "integration".into(),
        destination: destination.into(),
        ..IngressConfig::default()
    };
    config.listener.plaintext = true;
    config.listener.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_enabled = false;
    config
}

/// A running ingress with one plaintext listener per provenance.
pub struct TestIngress {
    pub overlay: SocketAddr,
    pub funnel: SocketAddr,
    pub metrics: Arc<MetricsRecorder>,
    pub server: IngressServer,
}

impl TestIngress {
    pub fn overlay_url(&self, path: &str) -> String {
        format!("http://{}{}", self.overlay, path)
    }

    pub fn funnel_url(&self, path: &str) -> String {
        format!("http://{}{}", self.funnel, path)
    }
}

/// Start an ingress for `config`. The funnel router is served over plaintext
/// but reports itself as TLS, as a funnel listener would.
pub async fn start_ingress(config: IngressConfig, whois: Option<Arc<dyn WhoIs>>) -> TestIngress {
    start_ingress_with(config, whois.into()).await
}

pub async fn start_ingress_with(config: IngressConfig, identity: IdentitySource) -> TestIngress {
    let metrics = Arc::new(MetricsRecorder::new());
    let server = IngressServer::new(config, identity, metrics.clone()).unwrap();
    let overlay = serve(server.router(Provenance::Overlay, false)).await;
    let funnel = serve(server.router(Provenance::Funnel, true)).await;
    TestIngress {
        overlay,
        funnel,
        metrics,
        server,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
