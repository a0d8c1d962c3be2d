//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (overlay or funnel listener)
//!     → server.rs (Axum setup, request ID, trace span, peer address)
//!     → proxy.rs (prefix table: deny → 404)
//!     → request.rs (rewrite URL and headers, resolve identity)
//!     → net::transport (one attempt to the upstream; failure → 502)
//!     → observability::metrics (status class, latency)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use proxy::{ProxyDispatcher, Snapshot, SnapshotError};
pub use request::{InboundConnection, RequestRewriter, RouteContext, UuidRequestId, X_REQUEST_ID};
pub use server::{AppState, BoundServer, IngressServer, ServeError};
