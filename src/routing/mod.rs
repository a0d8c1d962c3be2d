//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, raw path, provenance)
//!     → router.rs (deny rules, then allow rules, declaration order)
//!     → matcher.rs (provenance check, literal prefix check)
//!     → Return: Passthrough | Allowed(stripped path) | Denied
//!
//! Table Compilation (at startup and on reload):
//!     prefix strings ("/api", "funnel:/hook", "tailnet:/admin")
//!     → PrefixRule
//!     → Freeze as immutable PrefixTable
//! ```
//!
//! # Design Decisions
//! - Tables are built once and never mutated; reload swaps a new table in
//! - No regex in hot path (literal prefix matching only)
//! - Deterministic: same input always yields the same outcome

pub mod matcher;
pub mod router;

pub use matcher::{PrefixRule, Provenance, ProvenanceMatch, RequestPath, StrippedPath};
pub use router::{DenyReason, MatchOutcome, PrefixTable};
