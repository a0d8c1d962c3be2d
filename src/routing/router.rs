//! Prefix table lookup.
//!
//! # Responsibilities
//! - Store allow and deny rules in declaration order
//! - Decide allow/deny for a request path and provenance
//! - Compute the remainder path for strip-on-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Declaration order, not specificity: first match wins
//! - Deny rules are checked before allow rules
//! - Empty allow list = allow everything not denied

use std::fmt;

use crate::routing::matcher::{PrefixRule, Provenance, RequestPath, StrippedPath};

/// Result of evaluating a request against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No allow rules configured; the request passes unchanged.
    Passthrough,
    /// An allow rule matched; carries the path with the prefix removed.
    Allowed(StrippedPath),
    /// The request must not reach the upstream.
    Denied(DenyReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// A deny rule matched.
    DenyRule(PrefixRule),
    /// Allow rules exist but none matched.
    NoAllowMatch,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::DenyRule(rule) => write!(f, "matched deny rule {rule}"),
            DenyReason::NoAllowMatch => f.write_str("URL prefix not allowed"),
        }
    }
}

/// Ordered allow/deny prefix rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixTable {
    allow: Vec<PrefixRule>,
    deny: Vec<PrefixRule>,
}

impl PrefixTable {
    pub fn new(allow: Vec<PrefixRule>, deny: Vec<PrefixRule>) -> Self {
        Self { allow, deny }
    }

    /// A table with only allow rules.
    pub fn allow_only(allow: Vec<PrefixRule>) -> Self {
        Self::new(allow, Vec::new())
    }

    /// Evaluate a request path arriving with the given provenance.
    pub fn evaluate(&self, path: &RequestPath, provenance: Provenance) -> MatchOutcome {
        if let Some(rule) = self
            .deny
            .iter()
            .find(|rule| rule.matches(path, provenance).is_some())
        {
            return MatchOutcome::Denied(DenyReason::DenyRule(rule.clone()));
        }

        if self.allow.is_empty() {
            return MatchOutcome::Passthrough;
        }

        self.allow
            .iter()
            .find_map(|rule| rule.matches(path, provenance))
            .map(MatchOutcome::Allowed)
            .unwrap_or(MatchOutcome::Denied(DenyReason::NoAllowMatch))
    }
}

impl fmt::Display for PrefixTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let allow: Vec<String> = self.allow.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", allow.join(", "))?;
        if !self.deny.is_empty() {
            let deny: Vec<String> = self.deny.iter().map(ToString::to_string).collect();
            write!(f, " deny [{}]", deny.join(", "))?;
        }
        Ok(())
    }
}
