//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the ingress.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::local_api::DEFAULT_SOCKET_PATH;

/// Root configuration for the ingress proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct IngressConfig {
    /// Name of this service on the overlay network.
    pub name: String,

    /// Upstream URL every allowed request is proxied to.
    pub destination: String,

    /// Overlay (private) listener.
    pub listener: ListenerConfig,

    /// Public funnel listener.
    pub funnel: FunnelConfig,

    /// Prefix allow/deny rules.
    pub routing: RoutingConfig,

    /// Forwarding and static upstream headers.
    pub headers: HeadersConfig,

    /// Caller identity lookup.
    pub identity: IdentityConfig,

    /// How the upstream is dialed.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:443").
    pub bind_address: String,

    /// Serve plaintext HTTP instead of TLS.
    pub plaintext: bool,

    /// Certificate and key for TLS listeners.
    pub tls: Option<TlsConfig>,

    /// Bound on reading one request's headers, for the overlay and funnel
    /// listeners. 0 leaves slow clients unbounded.
    pub read_header_timeout_ms: u64,
}

impl ListenerConfig {
    pub fn read_header_timeout(&self) -> Option<Duration> {
        (self.read_header_timeout_ms > 0).then(|| Duration::from_millis(self.read_header_timeout_ms))
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:443".to_string(),
            plaintext: false,
            tls: None,
            read_header_timeout_ms: 0,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Funnel (public ingress) configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FunnelConfig {
    /// Expose a funnel listener.
    pub enabled: bool,

    /// Expose only the funnel listener, not the overlay one.
    pub only: bool,

    /// Bind address for funnel traffic.
    pub bind_address: String,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            only: false,
            bind_address: "0.0.0.0:8443".to_string(),
        }
    }
}

/// Prefix rules. See `routing::matcher` for the rule syntax.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Allowed URL prefixes; empty allows everything.
    pub prefixes: Vec<String>,

    /// Denied URL prefixes, checked before the allowed ones.
    pub deny_prefixes: Vec<String>,

    /// Strip the matched prefix before forwarding.
    pub strip_prefix: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            prefixes: Vec::new(),
            deny_prefixes: Vec::new(),
            strip_prefix: true,
        }
    }
}

/// Header injection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HeadersConfig {
    /// Set Host, X-Scheme, X-Real-Ip, X-Forwarded-{Server,Port}.
    pub recommended: bool,

    /// Extra headers on upstream requests, as "Name: value".
    pub upstream: Vec<String>,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            recommended: true,
            upstream: Vec::new(),
        }
    }
}

/// Identity lookup settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Do not set X-Tailscale-User-* headers.
    pub suppress: bool,

    /// Lookup bound in milliseconds; 0 waits until the request ends.
    pub timeout_ms: u64,

    /// Socket of the overlay daemon's local API.
    pub socket_path: String,
}

impl IdentityConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            suppress: false,
            timeout_ms: 1000,
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
        }
    }
}

/// Upstream dialing options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Dial this TCP address instead of the destination host.
    pub tcp_addr: String,

    /// Dial this UNIX domain socket instead of the destination host.
    pub unix_addr: String,

    /// Disable TLS certificate validation on the upstream.
    pub insecure_https: bool,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "127.0.0.1:9099".to_string(),
        }
    }
}
