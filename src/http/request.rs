//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request IDs (UUID v4)
//! - Point the request at the configured destination
//! - Maintain forwarding, recommended, static and identity headers
//! - Stamp the per-request `RouteContext`
//!
//! # Design Decisions
//! - Rewrite steps run in a fixed order; static headers win over forwarding
//!   headers, identity headers are set last
//! - Caller identity headers are removed even when no lookup happens
//! - Original request preserved for logging; modified copy forwarded

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Uri, Version};
use tower_http::request_id::{MakeRequestId, RequestId};
use url::{Position, Url};

use crate::identity::{Identity, IdentityResolver};
use crate::net::TransportError;
use crate::routing::{Provenance, RequestPath};
use crate::security::headers::{
    set_forwarded, set_identity_headers, set_recommended, strip_hop_by_hop, strip_identity_headers,
    StaticHeaders,
};

/// Header name for request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates a UUID v4 request ID for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// What the listener knows about the connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundConnection {
    pub peer: SocketAddr,
    pub tls: bool,
    pub provenance: Provenance,
}

/// Per-request observation context, created by the rewriter.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub start: Instant,
    pub original_uri: Uri,
    pub rewritten_uri: Uri,
    pub identity: Option<Identity>,
}

impl RouteContext {
    pub fn login_name(&self) -> &str {
        self.identity.as_ref().map_or("", |i| i.login_name.as_str())
    }

    pub fn node_name(&self) -> &str {
        self.identity.as_ref().map_or("", |i| i.node_name.as_str())
    }
}

/// Builds outbound requests for the configured destination.
#[derive(Debug, Clone)]
pub struct RequestRewriter {
    destination: Url,
    recommended_headers: bool,
    static_headers: StaticHeaders,
    identity: IdentityResolver,
}

impl RequestRewriter {
    pub fn new(
        destination: Url,
        recommended_headers: bool,
        static_headers: StaticHeaders,
        identity: IdentityResolver,
    ) -> Self {
        Self {
            destination,
            recommended_headers,
            static_headers,
            identity,
        }
    }

    pub fn destination(&self) -> &Url {
        &self.destination
    }

    /// Turn an allowed inbound request into the request sent upstream.
    ///
    /// `forwarded` is the path left after prefix matching.
    pub async fn rewrite(
        &self,
        request: Request<Body>,
        forwarded: &RequestPath,
        conn: &InboundConnection,
    ) -> Result<(Request<Body>, RouteContext), TransportError> {
        let start = Instant::now();
        let (mut parts, body) = request.into_parts();
        let original_uri = parts.uri.clone();
        let inbound_host = inbound_host(&parts.headers, &parts.uri);
        let client_ip = conn.peer.ip().to_string();

        let rewritten_uri = self.target_uri(forwarded, parts.uri.query())?;
        parts.uri = rewritten_uri.clone();
        parts.version = Version::HTTP_11;

        let headers = &mut parts.headers;
        strip_hop_by_hop(headers);
        set_forwarded(headers, Some(&client_ip), inbound_host.as_deref(), conn.tls);

        headers.remove(header::HOST);
        if self.recommended_headers {
            set_recommended(headers, Some(&client_ip), inbound_host.as_deref(), conn.tls);
            if let Some(host) = inbound_host.as_deref().and_then(|h| HeaderValue::from_str(h).ok()) {
                headers.insert(header::HOST, host);
            }
        }

        self.static_headers.apply(headers);

        strip_identity_headers(headers);
        let identity = self.identity.resolve(conn.peer).await;
        if let Some(identity) = &identity {
            set_identity_headers(headers, identity);
        }

        let ctx = RouteContext {
            start,
            original_uri,
            rewritten_uri,
            identity,
        };
        tracing::info!(
            original = %ctx.original_uri,
            rewritten = %ctx.rewritten_uri,
            destination = %self.destination,
            provenance = %conn.provenance,
            origin_login = ctx.login_name(),
            origin_node = ctx.node_name(),
            "Rewrote request"
        );

        Ok((Request::from_parts(parts, body), ctx))
    }

    /// Destination origin, joined path and merged query.
    fn target_uri(&self, forwarded: &RequestPath, query: Option<&str>) -> Result<Uri, TransportError> {
        let base_path = &self.destination[Position::BeforePath..Position::AfterPath];
        let path = match forwarded.escaped().as_ref() {
            "" => base_path.to_string(),
            rest => join_paths(base_path, rest),
        };

        let query = match (self.destination.query(), query) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => format!("{a}&{b}"),
            (a, b) => format!("{}{}", a.unwrap_or(""), b.unwrap_or("")),
        };

        let origin = &self.destination[..Position::BeforePath];
        let target = if query.is_empty() {
            format!("{origin}{path}")
        } else {
            format!("{origin}{path}?{query}")
        };
        Ok(target.parse()?)
    }
}

/// Join two paths with exactly one slash between them.
fn join_paths(base: &str, rest: &str) -> String {
    match (base.ends_with('/'), rest.starts_with('/')) {
        (true, true) => format!("{base}{}", &rest[1..]),
        (false, false) => format!("{base}/{rest}"),
        _ => format!("{base}{rest}"),
    }
}

/// Host the caller addressed: the `Host` header, or the URI authority (HTTP/2).
fn inbound_host(headers: &axum::http::HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
}
