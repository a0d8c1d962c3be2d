//! Header manipulation for forwarded requests.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Maintain the X-Forwarded-* family and the recommended proxy headers
//! - Remove caller-supplied identity headers and inject verified ones
//! - Apply statically configured upstream headers
//!
//! # Design Decisions
//! - Inbound `Forwarded`/`X-Forwarded-Host`/`X-Forwarded-Proto` are never
//!   trusted; only the `X-Forwarded-For` chain is extended
//! - Any header starting with `X-Tailscale-` (any case) is removed before
//!   identity headers are set, whether or not a lookup happens

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::identity::Identity;

/// Reserved prefix of identity headers (lowercase, as stored by `HeaderMap`).
pub const IDENTITY_HEADER_PREFIX: &str = "x-tailscale-";

pub const X_TAILSCALE_USER: HeaderName = HeaderName::from_static("x-tailscale-user");
pub const X_TAILSCALE_USER_LOGIN_NAME: HeaderName =
    HeaderName::from_static("x-tailscale-user-loginname");
pub const X_TAILSCALE_USER_LOGIN_NAME_LOCALPART: HeaderName =
    HeaderName::from_static("x-tailscale-user-loginname-localpart");
pub const X_TAILSCALE_USER_LOGIN_NAME_DOMAIN: HeaderName =
    HeaderName::from_static("x-tailscale-user-loginname-domain");
pub const X_TAILSCALE_USER_DISPLAY_NAME: HeaderName =
    HeaderName::from_static("x-tailscale-user-displayname");
pub const X_TAILSCALE_USER_PROFILE_PIC_URL: HeaderName =
    HeaderName::from_static("x-tailscale-user-profilepicurl");
pub const X_TAILSCALE_CAPS: HeaderName = HeaderName::from_static("x-tailscale-caps");
pub const X_TAILSCALE_NODE: HeaderName = HeaderName::from_static("x-tailscale-node");
pub const X_TAILSCALE_NODE_NAME: HeaderName = HeaderName::from_static("x-tailscale-node-name");
pub const X_TAILSCALE_NODE_CAPS: HeaderName = HeaderName::from_static("x-tailscale-node-caps");
pub const X_TAILSCALE_NODE_TAGS: HeaderName = HeaderName::from_static("x-tailscale-node-tags");

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_SERVER: HeaderName = HeaderName::from_static("x-forwarded-server");
pub const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");
pub const X_SCHEME: HeaderName = HeaderName::from_static("x-scheme");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

/// Replace the forwarding headers with ones describing this hop.
///
/// The client IP is appended to any `X-Forwarded-For` chain the caller sent.
pub fn set_forwarded(headers: &mut HeaderMap, client_ip: Option<&str>, host: Option<&str>, tls: bool) {
    let prior: Vec<String> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();

    headers.remove(header::FORWARDED);
    headers.remove(&X_FORWARDED_FOR);
    headers.remove(&X_FORWARDED_HOST);
    headers.remove(&X_FORWARDED_PROTO);

    if let Some(ip) = client_ip {
        let chain = if prior.is_empty() {
            ip.to_string()
        } else {
            format!("{}, {}", prior.join(", "), ip)
        };
        insert_str(headers, X_FORWARDED_FOR, &chain);
    }
    if let Some(host) = host {
        insert_str(headers, X_FORWARDED_HOST, host);
    }
    headers.insert(X_FORWARDED_PROTO, scheme_value(tls));
}

/// Set `X-Scheme`, `X-Real-Ip` and `X-Forwarded-Server`/`-Port`.
pub fn set_recommended(headers: &mut HeaderMap, client_ip: Option<&str>, host: Option<&str>, tls: bool) {
    headers.insert(X_SCHEME, scheme_value(tls));
    if let Some(ip) = client_ip {
        insert_str(headers, X_REAL_IP, ip);
    }
    if let Some(host) = host {
        match split_host_port(host) {
            Some((server, port)) => {
                insert_str(headers, X_FORWARDED_SERVER, server);
                insert_str(headers, X_FORWARDED_PORT, port);
            }
            None => insert_str(headers, X_FORWARDED_SERVER, host),
        }
    }
}

fn scheme_value(tls: bool) -> HeaderValue {
    HeaderValue::from_static(if tls { "https" } else { "http" })
}

/// Split `host:port` or `[v6]:port`. Returns `None` if there is no port.
pub fn split_host_port(hostport: &str) -> Option<(&str, &str)> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = hostport.split_once(':')?;
    if port.contains(':') {
        return None;
    }
    Some((host, port))
}

/// Statically configured upstream headers, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticHeaders(Vec<(HeaderName, HeaderValue)>);

impl StaticHeaders {
    pub fn new(entries: Vec<(HeaderName, HeaderValue)>) -> Self {
        Self(entries)
    }

    /// Overwrite every configured name with all of its configured values.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, _) in &self.0 {
            headers.remove(name);
        }
        for (name, value) in &self.0 {
            headers.append(name.clone(), value.clone());
        }
    }
}

/// Remove every header whose name begins with the identity prefix.
pub fn strip_identity_headers(headers: &mut HeaderMap) {
    let spoofed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(IDENTITY_HEADER_PREFIX))
        .cloned()
        .collect();
    for name in spoofed {
        tracing::debug!(header = %name, "Removing caller-supplied identity header");
        headers.remove(name);
    }
}

/// Set the verified identity headers for `identity`.
pub fn set_identity_headers(headers: &mut HeaderMap, identity: &Identity) {
    insert_str(headers, X_TAILSCALE_USER, &identity.user_id);
    insert_str(headers, X_TAILSCALE_USER_LOGIN_NAME, &identity.login_name);
    if let Some((local, domain)) = identity.login_parts() {
        insert_str(headers, X_TAILSCALE_USER_LOGIN_NAME_LOCALPART, local);
        insert_str(headers, X_TAILSCALE_USER_LOGIN_NAME_DOMAIN, domain);
    }
    insert_str(headers, X_TAILSCALE_USER_DISPLAY_NAME, &identity.display_name);
    if let Some(url) = &identity.profile_pic_url {
        insert_str(headers, X_TAILSCALE_USER_PROFILE_PIC_URL, url);
    }
    insert_list(headers, X_TAILSCALE_CAPS, &identity.capabilities);

    insert_str(headers, X_TAILSCALE_NODE, &identity.node_id);
    insert_str(headers, X_TAILSCALE_NODE_NAME, &identity.node_name);
    insert_list(headers, X_TAILSCALE_NODE_CAPS, &identity.node_capabilities);
    insert_list(headers, X_TAILSCALE_NODE_TAGS, &identity.node_tags);
}

fn insert_list(headers: &mut HeaderMap, name: HeaderName, values: &[String]) {
    if !values.is_empty() {
        insert_str(headers, name, &values.join(", "));
    }
}

fn insert_str(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_bytes(value.as_bytes()) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::debug!(header = %name, "Dropping header with invalid value"),
    }
}
