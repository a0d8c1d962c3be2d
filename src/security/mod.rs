//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request being built:
//!     → headers.rs (drop hop-by-hop, rebuild X-Forwarded-*)
//!     → headers.rs (apply static upstream headers)
//!     → headers.rs (strip X-Tailscale-*, inject verified identity)
//!     → Forward to upstream
//! ```
//!
//! # Design Decisions
//! - No trust in client input: identity headers are always stripped
//! - Only verified identity ever reaches the upstream

pub mod headers;
