//! Bounded identity lookup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::identity::{Identity, IdentityError, WhoIs};

/// Default bound on a single identity lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolves peer addresses to identities, tolerating every failure.
#[derive(Clone)]
pub struct IdentityResolver {
    client: Option<Arc<dyn WhoIs>>,
    timeout: Option<Duration>,
    suppressed: bool,
}

impl IdentityResolver {
    /// `timeout` of `None` lets the lookup run until the request is dropped.
    pub fn new(client: Option<Arc<dyn WhoIs>>, timeout: Option<Duration>, suppressed: bool) -> Self {
        Self {
            client,
            timeout,
            suppressed,
        }
    }

    /// A resolver that never looks anything up.
    pub fn disabled() -> Self {
        Self::new(None, None, true)
    }

    pub async fn resolve(&self, peer: SocketAddr) -> Option<Identity> {
        if self.suppressed {
            return None;
        }
        let client = self.client.as_ref()?;

        let lookup = client.whois(peer);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .unwrap_or(Err(IdentityError::Timeout(limit))),
            None => lookup.await,
        };

        match result {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Could not look up requestor identity");
                None
            }
        }
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("client", &self.client.is_some())
            .field("timeout", &self.timeout)
            .field("suppressed", &self.suppressed)
            .finish()
    }
}
