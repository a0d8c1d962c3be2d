//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Record request latency and response status classes
//! - Count forwarding failures separately from upstream error statuses
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `ingress_request_duration_seconds` (histogram): latency by status class
//! - `ingress_responses_total` (counter): responses by status class
//! - `ingress_proxy_errors_total` (counter): transport failures
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Every update is mirrored to the `metrics` facade for scraping
//! - The recorder observes only; it never influences routing

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{Response, StatusCode};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::http::request::RouteContext;

pub const REQUEST_DURATION: &str = "ingress_request_duration_seconds";
pub const RESPONSES_TOTAL: &str = "ingress_responses_total";
pub const PROXY_ERRORS_TOTAL: &str = "ingress_proxy_errors_total";

/// Status-code class of an upstream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub const ALL: [StatusClass; 5] = [
        StatusClass::Informational,
        StatusClass::Success,
        StatusClass::Redirection,
        StatusClass::ClientError,
        StatusClass::ServerError,
    ];

    pub fn of(status: StatusCode) -> Self {
        match status.as_u16() {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusClass::Informational => "1xx",
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Shared response observer. Safe for concurrent use from every request.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    responses: [AtomicU64; 5],
    proxy_errors: AtomicU64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response received from the upstream.
    pub fn observe<B>(&self, response: &Response<B>, ctx: &RouteContext) {
        let status = response.status();
        let class = StatusClass::of(status);
        let elapsed = ctx.start.elapsed();

        self.responses[class.index()].fetch_add(1, Ordering::Relaxed);
        metrics::counter!(RESPONSES_TOTAL, "status_class" => class.label()).increment(1);
        metrics::histogram!(REQUEST_DURATION, "status_class" => class.label())
            .record(elapsed.as_secs_f64());

        tracing::info!(
            original = %ctx.original_uri,
            rewritten = %ctx.rewritten_uri,
            origin_login = ctx.login_name(),
            origin_node = ctx.node_name(),
            duration_ms = elapsed.as_millis() as u64,
            status = status.as_u16(),
            "Upstream responded"
        );
    }

    /// Record a forwarding failure (no upstream status was received).
    pub fn record_error(&self) {
        self.proxy_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(PROXY_ERRORS_TOTAL).increment(1);
    }

    pub fn responses(&self, class: StatusClass) -> u64 {
        self.responses[class.index()].load(Ordering::Relaxed)
    }

    pub fn total_responses(&self) -> u64 {
        StatusClass::ALL.iter().map(|c| self.responses(*c)).sum()
    }

    pub fn proxy_errors(&self) -> u64 {
        self.proxy_errors.load(Ordering::Relaxed)
    }
}

/// Describe metrics and start the Prometheus scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    metrics::describe_histogram!(
        REQUEST_DURATION,
        metrics::Unit::Seconds,
        "Time from rewrite to upstream response headers"
    );
    metrics::describe_counter!(RESPONSES_TOTAL, "Upstream responses by status class");
    metrics::describe_counter!(PROXY_ERRORS_TOTAL, "Requests that could not be forwarded");

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}
