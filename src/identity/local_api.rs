//! Identity lookups against the overlay daemon's local API.
//!
//! The daemon serves HTTP/1.1 on a UNIX socket; `GET /localapi/v0/whois?addr=`
//! returns the user profile and node record for a peer address.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::body::Body;
use axum::http::{header, Request};
use futures_util::future::BoxFuture;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::UnixStream;

use crate::identity::{Identity, IdentityError, WhoIs};

/// Default location of the overlay daemon's socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/tailscale/tailscaled.sock";

const LOCAL_API_HOST: &str = "local-tailscaled.sock";
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Client for the daemon's local whois endpoint.
#[derive(Debug, Clone)]
pub struct LocalApiClient {
    socket_path: PathBuf,
}

impl LocalApiClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    async fn lookup(&self, peer: SocketAddr) -> Result<Identity, IdentityError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(IdentityError::Connect)?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Local API connection closed with error");
            }
        });

        let uri = format!(
            "/localapi/v0/whois?addr={}",
            urlencoding::encode(&peer.to_string())
        );
        let request = Request::get(uri)
            .header(header::HOST, LOCAL_API_HOST)
            .body(Body::empty())?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::Status(status));
        }

        let body = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES).await?;
        let record: WhoIsResponse = serde_json::from_slice(&body)?;
        Ok(record.into())
    }
}

impl WhoIs for LocalApiClient {
    fn whois(&self, peer: SocketAddr) -> BoxFuture<'_, Result<Identity, IdentityError>> {
        Box::pin(self.lookup(peer))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WhoIsResponse {
    #[serde(rename = "Node")]
    node: NodeRecord,
    #[serde(rename = "UserProfile")]
    user: UserRecord,
    #[serde(rename = "Caps")]
    caps: Option<Vec<String>>,
    #[serde(rename = "CapMap")]
    cap_map: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeRecord {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "ComputedName")]
    computed_name: String,
    #[serde(rename = "Capabilities")]
    capabilities: Option<Vec<String>>,
    #[serde(rename = "CapMap")]
    cap_map: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "Tags")]
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserRecord {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "LoginName")]
    login_name: String,
    #[serde(rename = "DisplayName")]
    display_name: String,
    #[serde(rename = "ProfilePicURL")]
    profile_pic_url: String,
}

fn caps_or_keys(caps: Option<Vec<String>>, cap_map: BTreeMap<String, serde_json::Value>) -> Vec<String> {
    caps.unwrap_or_else(|| cap_map.into_keys().collect())
}

impl From<WhoIsResponse> for Identity {
    fn from(record: WhoIsResponse) -> Self {
        let WhoIsResponse {
            node,
            user,
            caps,
            cap_map,
        } = record;
        Identity {
            user_id: user.id.to_string(),
            login_name: user.login_name,
            display_name: user.display_name,
            profile_pic_url: Some(user.profile_pic_url).filter(|url| !url.is_empty()),
            capabilities: caps_or_keys(caps, cap_map),
            node_id: node.id.to_string(),
            node_name: node.computed_name,
            node_capabilities: caps_or_keys(node.capabilities, node.cap_map),
            node_tags: node.tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_whois_record() {
        let json = r#"{
            "Node": {
                "ID": 4411,
                "StableID": "nAbc123",
                "ComputedName": "laptop",
                "Capabilities": ["https://tailscale.com/cap/ssh"],
                "Tags": ["tag:server", "tag:prod"]
            },
            "UserProfile": {
                "ID": 9001,
                "LoginName": "alice@example.com",
                "DisplayName": "Alice",
                "ProfilePicURL": ""
            },
            "CapMap": {"example.com/cap/admin": [], "example.com/cap/read": []}
        }"#;
        let record: WhoIsResponse = serde_json::from_str(json).unwrap();
        let identity = Identity::from(record);

        assert_eq!(identity.user_id, "9001");
        assert_eq!(identity.login_name, "alice@example.com");
        assert_eq!(identity.profile_pic_url, None);
        assert_eq!(identity.capabilities, vec!["example.com/cap/admin", "example.com/cap/read"]);
        assert_eq!(identity.node_id, "4411");
        assert_eq!(identity.node_name, "laptop");
        assert_eq!(identity.node_capabilities, vec!["https://tailscale.com/cap/ssh"]);
        assert_eq!(identity.node_tags, vec!["tag:server", "tag:prod"]);
    }

    #[test]
    fn test_explicit_caps_win_over_cap_map() {
        let json = r#"{"Caps": ["a"], "CapMap": {"b": null}, "UserProfile": {"ProfilePicURL": "https://pic"}}"#;
        let identity = Identity::from(serde_json::from_str::<WhoIsResponse>(json).unwrap());
        assert_eq!(identity.capabilities, vec!["a"]);
        assert_eq!(identity.profile_pic_url.as_deref(), Some("https://pic"));
    }

    #[tokio::test]
    async fn test_missing_socket_is_connect_error() {
        let client = LocalApiClient::new("/nonexistent/tailnet-ingress-test.sock");
        let err = client.whois("100.64.0.1:1234".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, IdentityError::Connect(_)));
    }
}
