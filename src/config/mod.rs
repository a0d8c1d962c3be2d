//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → IngressConfig (validated, immutable)
//!     → compiled into a routing snapshot by the server
//!
//! On file change (--watch):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server rebuilds the snapshot and swaps it atomically
//!     → in-flight requests finish on the snapshot they started with
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener addresses and TLS material are read once at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    FunnelConfig, HeadersConfig, IdentityConfig, IngressConfig, ListenerConfig,
    ObservabilityConfig, RoutingConfig, TlsConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
