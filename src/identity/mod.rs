//! Caller identity subsystem.
//!
//! # Data Flow
//! ```text
//! peer address (ip:port)
//!     → resolver.rs (suppression check, bounded lookup)
//!     → WhoIs implementation (local_api.rs talks to the overlay daemon)
//!     → Identity (transient, per request) or none
//! ```
//!
//! # Design Decisions
//! - Identity is never persisted or cached across requests
//! - Lookup failures never fail the request; they only drop identity headers
//! - Lookups are bounded by a timeout and dropped with the request future

pub mod local_api;
pub mod resolver;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;

pub use local_api::LocalApiClient;
pub use resolver::IdentityResolver;

use crate::config::schema::IdentityConfig;

/// Verified user and node identity of an overlay peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub login_name: String,
    pub display_name: String,
    pub profile_pic_url: Option<String>,
    pub capabilities: Vec<String>,
    pub node_id: String,
    pub node_name: String,
    pub node_capabilities: Vec<String>,
    pub node_tags: Vec<String>,
}

impl Identity {
    /// Local part and domain of the login name, if it contains an `@`.
    pub fn login_parts(&self) -> Option<(&str, &str)> {
        self.login_name.split_once('@')
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("connecting to identity service: {0}")]
    Connect(#[source] std::io::Error),

    #[error("identity service protocol error: {0}")]
    Protocol(#[from] hyper::Error),

    #[error("building identity request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("reading identity response: {0}")]
    Body(#[from] axum::Error),

    #[error("identity service returned {0}")]
    Status(StatusCode),

    #[error("decoding identity record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("identity lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// A source of verified peer identities ("who is this peer").
pub trait WhoIs: Send + Sync {
    fn whois(&self, peer: SocketAddr) -> BoxFuture<'_, Result<Identity, IdentityError>>;
}

/// Where a configuration's identity lookups are sent.
///
/// Resolved again for every configuration, so a reload can flip
/// `identity.suppress` or move `identity.socket_path`.
#[derive(Clone)]
pub enum IdentitySource {
    /// The overlay daemon listening on `identity.socket_path`.
    LocalApi,
    /// One client for every configuration, whatever the socket path says.
    Client(Arc<dyn WhoIs>),
    /// No identity service at all.
    Disabled,
}

impl IdentitySource {
    pub fn resolver(&self, config: &IdentityConfig) -> IdentityResolver {
        let client: Arc<dyn WhoIs> = match self {
            IdentitySource::LocalApi => Arc::new(LocalApiClient::new(&config.socket_path)),
            IdentitySource::Client(client) => client.clone(),
            IdentitySource::Disabled => return IdentityResolver::disabled(),
        };
        IdentityResolver::new(Some(client), config.timeout(), config.suppress)
    }
}

impl From<Option<Arc<dyn WhoIs>>> for IdentitySource {
    fn from(client: Option<Arc<dyn WhoIs>>) -> Self {
        client.map_or(IdentitySource::Disabled, IdentitySource::Client)
    }
}
