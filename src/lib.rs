//! Identity-aware reverse-proxy ingress for a single upstream service.

pub mod config;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::schema::IngressConfig;
pub use http::IngressServer;
pub use lifecycle::Shutdown;
