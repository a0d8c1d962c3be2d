//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     listener (plaintext or TLS, one per provenance)
//!     → tls.rs (certificate loading for TLS listeners)
//!     → Hand off to HTTP layer
//!
//! Outbound:
//!     rewritten request
//!     → transport.rs (TCP by URL, fixed TCP address, UNIX socket, or TLS)
//!     → upstream
//! ```
//!
//! # Design Decisions
//! - The engine is agnostic to how the upstream is reached
//! - TLS is optional and handled transparently

pub mod tls;
pub mod transport;

pub use transport::{build_transport, Transport, TransportError};
