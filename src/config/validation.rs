//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Parse destination, prefix rules and static headers into runtime types
//! - Reject conflicting listener and upstream options
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system, at startup and on reload

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue};
use url::Url;

use crate::config::schema::IngressConfig;
use crate::routing::matcher::RuleParseError;
use crate::routing::{PrefixRule, PrefixTable};
use crate::security::headers::StaticHeaders;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("a service name is required")]
    NameRequired,

    #[error("a destination URL is required")]
    DestinationRequired,

    #[error("invalid destination URL {value:?}: {reason}")]
    InvalidDestination { value: String, reason: String },

    #[error("can not serve plaintext on a funnel service")]
    PlaintextOnFunnel,

    #[error("funnel.enabled is required if funnel.only is set")]
    FunnelRequired,

    #[error("when providing either a certificate or key file, the other must be provided")]
    TlsPairIncomplete,

    #[error("TLS listeners need listener.tls.cert_path and listener.tls.key_path")]
    TlsRequired,

    #[error("can only proxy to one address at a time, set either upstream.unix_addr or upstream.tcp_addr")]
    OnlyOneAddrType,

    #[error("a UNIX socket upstream can not serve an https destination")]
    UnixWithHttps,

    #[error("upstream.tcp_addr {0:?} must be an ip:port address for https destinations")]
    HttpsAddrNotSocket(String),

    #[error("invalid {field} {value:?}: not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error(transparent)]
    InvalidPrefix(#[from] RuleParseError),

    #[error("header format must be 'Header-Name: value', got {0:?}")]
    InvalidHeader(String),
}

/// Validate the whole configuration, collecting every problem.
pub fn validate_config(config: &IngressConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.name.is_empty() {
        errors.push(ValidationError::NameRequired);
    }
    let destination = match parse_destination(&config.destination) {
        Ok(url) => Some(url),
        Err(e) => {
            errors.push(e);
            None
        }
    };

    let listener = &config.listener;
    let funnel = &config.funnel;
    if listener.plaintext && funnel.enabled {
        errors.push(ValidationError::PlaintextOnFunnel);
    }
    if funnel.only && !funnel.enabled {
        errors.push(ValidationError::FunnelRequired);
    }
    match &listener.tls {
        Some(tls) if tls.cert_path.is_empty() != tls.key_path.is_empty() => {
            errors.push(ValidationError::TlsPairIncomplete);
        }
        Some(tls) if !tls.cert_path.is_empty() => {}
        _ => {
            let overlay_tls = !listener.plaintext && !funnel.only;
            if overlay_tls || funnel.enabled {
                errors.push(ValidationError::TlsRequired);
            }
        }
    }

    if !funnel.only {
        check_address(&mut errors, "listener.bind_address", &listener.bind_address);
    }
    if funnel.enabled {
        check_address(&mut errors, "funnel.bind_address", &funnel.bind_address);
    }
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    let upstream = &config.upstream;
    if !upstream.tcp_addr.is_empty() && !upstream.unix_addr.is_empty() {
        errors.push(ValidationError::OnlyOneAddrType);
    }
    if destination.as_ref().is_some_and(|url| url.scheme() == "https") {
        if !upstream.unix_addr.is_empty() {
            errors.push(ValidationError::UnixWithHttps);
        }
        if !upstream.tcp_addr.is_empty() && upstream.tcp_addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::HttpsAddrNotSocket(upstream.tcp_addr.clone()));
        }
    }

    if let Err(e) = parse_prefix_table(&config.routing.prefixes, &config.routing.deny_prefixes) {
        errors.extend(e);
    }
    if let Err(e) = parse_static_headers(&config.headers.upstream) {
        errors.extend(e);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// Parse the destination URL; only absolute http(s) URLs with a host are accepted.
pub fn parse_destination(value: &str) -> Result<Url, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::DestinationRequired);
    }
    let invalid = |reason: String| ValidationError::InvalidDestination {
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Build the prefix table from allow and deny rule strings.
pub fn parse_prefix_table(allow: &[String], deny: &[String]) -> Result<PrefixTable, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut parse_all = |specs: &[String]| -> Vec<PrefixRule> {
        specs
            .iter()
            .filter_map(|spec| match spec.parse::<PrefixRule>() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    errors.push(e.into());
                    None
                }
            })
            .collect()
    };
    let allow = parse_all(allow);
    let deny = parse_all(deny);

    if errors.is_empty() {
        Ok(PrefixTable::new(allow, deny))
    } else {
        Err(errors)
    }
}

/// Parse "Name: value" entries, keeping their order.
pub fn parse_static_headers(entries: &[String]) -> Result<StaticHeaders, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut parsed = Vec::with_capacity(entries.len());

    for entry in entries {
        let header = entry.split_once(": ").and_then(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            Some((name, value))
        });
        match header {
            Some(header) => parsed.push(header),
            None => errors.push(ValidationError::InvalidHeader(entry.clone())),
        }
    }

    if errors.is_empty() {
        Ok(StaticHeaders::new(parsed))
    } else {
        Err(errors)
    }
}
