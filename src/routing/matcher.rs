//! Prefix rule matching.
//!
//! # Responsibilities
//! - Parse prefix rules (`/path`, `tailnet:/path`, `funnel:/path`)
//! - Check provenance compatibility before touching the path
//! - Match literal string prefixes against both the decoded and the raw path
//!
//! # Design Decisions
//! - Matching is a literal string prefix, not path-segment aware:
//!   `/api` matches `/apiextra` as well as `/api/x`
//! - A rule only matches if trimming it actually shortens the path
//! - When the request carries an escaped raw path, the raw path must shrink too

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use axum::http::Uri;
use serde::{Deserialize, Serialize};

const TAILNET_MARKER: &str = "tailnet:";
const FUNNEL_MARKER: &str = "funnel:";

/// Where a request entered the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Arrived over the private overlay network.
    Overlay,
    /// Arrived from the public internet through the funnel relay.
    Funnel,
}

impl Provenance {
    pub fn is_funnel(self) -> bool {
        matches!(self, Provenance::Funnel)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Overlay => "tailnet",
            Provenance::Funnel => "funnel",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance constraint carried by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvenanceMatch {
    #[default]
    Either,
    FunnelOnly,
    OverlayOnly,
}

impl ProvenanceMatch {
    /// Returns true if a request of the given provenance may use this rule.
    pub fn admits(self, provenance: Provenance) -> bool {
        match self {
            ProvenanceMatch::Either => true,
            ProvenanceMatch::FunnelOnly => provenance.is_funnel(),
            ProvenanceMatch::OverlayOnly => !provenance.is_funnel(),
        }
    }
}

/// Error returned when a rule string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("prefix rule {0:?} has an empty path")]
    EmptyPath(String),
    #[error("prefix rule {0:?} must start with '/'")]
    NotAbsolute(String),
}

/// An immutable path-prefix rule with a provenance constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrefixRule {
    path: String,
    provenance: ProvenanceMatch,
}

/// The request path left over after a rule matched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StrippedPath {
    pub path: String,
    pub raw_path: String,
}

impl PrefixRule {
    pub fn new(path: impl Into<String>, provenance: ProvenanceMatch) -> Self {
        Self {
            path: path.into(),
            provenance,
        }
    }

    pub fn either(path: impl Into<String>) -> Self {
        Self::new(path, ProvenanceMatch::Either)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn provenance(&self) -> ProvenanceMatch {
        self.provenance
    }

    /// Match a request path against this rule.
    ///
    /// `raw_path` is the escaped form of the path, or empty if the path had
    /// no escapes. Returns the remainder of both paths on a match.
    pub fn matches(&self, path: &RequestPath, provenance: Provenance) -> Option<StrippedPath> {
        if !self.provenance.admits(provenance) {
            return None;
        }

        let rest = trim_prefix(&path.path, &self.path);
        let raw_rest = trim_prefix(&path.raw_path, &self.path);
        let shrunk = rest.len() < path.path.len();
        let raw_shrunk = path.raw_path.is_empty() || raw_rest.len() < path.raw_path.len();

        (shrunk && raw_shrunk).then(|| StrippedPath {
            path: rest.to_string(),
            raw_path: raw_rest.to_string(),
        })
    }
}

fn trim_prefix<'a>(s: &'a str, prefix: &str) -> &'a str {
    s.strip_prefix(prefix).unwrap_or(s)
}

impl FromStr for PrefixRule {
    type Err = RuleParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (provenance, path) = if let Some(path) = value.strip_prefix(TAILNET_MARKER) {
            (ProvenanceMatch::OverlayOnly, path)
        } else if let Some(path) = value.strip_prefix(FUNNEL_MARKER) {
            (ProvenanceMatch::FunnelOnly, path)
        } else {
            (ProvenanceMatch::Either, value)
        };

        if path.is_empty() {
            return Err(RuleParseError::EmptyPath(value.to_string()));
        }
        if !path.starts_with('/') {
            return Err(RuleParseError::NotAbsolute(value.to_string()));
        }
        Ok(Self::new(path, provenance))
    }
}

impl TryFrom<String> for PrefixRule {
    type Error = RuleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PrefixRule> for String {
    fn from(rule: PrefixRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for PrefixRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provenance {
            ProvenanceMatch::Either => f.write_str(&self.path),
            ProvenanceMatch::FunnelOnly => write!(f, "{FUNNEL_MARKER}{}", self.path),
            ProvenanceMatch::OverlayOnly => write!(f, "{TAILNET_MARKER}{}", self.path),
        }
    }
}

/// Decoded and raw forms of a request path.
///
/// `raw_path` is only set when the wire spelling differs from the default
/// escaping of the decoded path (`/a%2Fb`, but not `/a%20b`), so that a
/// decoded path and its escaped spelling can be checked independently.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestPath {
    pub path: String,
    pub raw_path: String,
}

impl RequestPath {
    pub fn from_uri(uri: &Uri) -> Self {
        Self::from_raw(uri.path())
    }

    pub fn from_raw(raw: &str) -> Self {
        match urlencoding::decode(raw) {
            Ok(decoded) => {
                let raw_path = if escape_path(&decoded) == raw {
                    String::new()
                } else {
                    raw.to_string()
                };
                Self {
                    path: decoded.into_owned(),
                    raw_path,
                }
            }
            Err(_) => Self {
                path: raw.to_string(),
                raw_path: String::new(),
            },
        }
    }

    /// The path as it should appear on the wire.
    pub fn escaped(&self) -> Cow<'_, str> {
        if self.raw_path.is_empty() {
            escape_path(&self.path)
        } else {
            Cow::Borrowed(&self.raw_path)
        }
    }
}

/// Bytes the default path escaping leaves alone.
fn path_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'_' | b'.' | b'~' | b'$' | b'&' | b'+' | b',' | b'/' | b':' | b';' | b'=' | b'@'
        )
}

/// Default escaping of a decoded path.
fn escape_path(path: &str) -> Cow<'_, str> {
    if path.bytes().all(path_safe) {
        return Cow::Borrowed(path);
    }
    let mut escaped = String::with_capacity(path.len() + 8);
    for b in path.bytes() {
        if path_safe(b) {
            escaped.push(char::from(b));
        } else {
            escaped.push_str(&format!("%{b:02X}"));
        }
    }
    Cow::Owned(escaped)
}

impl From<StrippedPath> for RequestPath {
    fn from(stripped: StrippedPath) -> Self {
        Self {
            path: stripped.path,
            raw_path: stripped.raw_path,
        }
    }
}
