//! Core domain types for BreachWatch findings and pipeline outcomes.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Description written onto an inventory record when its address shows up in a breach.
pub const BREACH_ANNOTATION: &str = "Found in data breach";

// ---------------------------------------------------------------------------
// IdentifierKind
// ---------------------------------------------------------------------------

/// What an identifier looks like. Only [`IdentifierKind::NetworkAddress`]
/// identifiers are propagated to the asset inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Email,
    NetworkAddress,
    Other,
}

impl IdentifierKind {
    /// Classify an identifier.
    ///
    /// Network addresses must parse as IPv4 or IPv6. Emails need exactly one
    /// `@` with something on both sides.
    pub fn classify(identifier: &str) -> Self {
        let trimmed = identifier.trim();
        if trimmed.parse::<IpAddr>().is_ok() {
            return Self::NetworkAddress;
        }

        let mut parts = trimmed.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {
                Self::Email
            }
            _ => Self::Other,
        }
    }

    pub fn is_network_address(self) -> bool {
        self == Self::NetworkAddress
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Email => "email",
            Self::NetworkAddress => "network_address",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// A confirmed breach-intelligence result for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// The identifier that was looked up.
    pub query: String,
    /// Raw payload returned by the breach source.
    pub data: serde_json::Value,
    /// When the lookup returned.
    pub captured_at: DateTime<Utc>,
}

impl Finding {
    /// Build a finding captured now.
    pub fn new(query: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            query: query.into(),
            data,
            captured_at: Utc::now(),
        }
    }

    /// The payload as stored in both the relational log and the index.
    pub fn serialized_data(&self) -> String {
        self.data.to_string()
    }
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are empty.
pub fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Stage outcomes
// ---------------------------------------------------------------------------

/// Result of checking one identifier against the breach source.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// The source returned a non-empty payload.
    Found(Finding),
    /// The source answered and had nothing.
    Clean,
    /// Every attempt failed; the identifier's status is unknown.
    Failed { error: String },
}

impl LookupOutcome {
    pub fn finding(&self) -> Option<&Finding> {
        match self {
            Self::Found(f) => Some(f),
            _ => None,
        }
    }
}

/// Which of the two finding stores a write went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Log,
    Index,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => f.write_str("log"),
            Self::Index => f.write_str("index"),
        }
    }
}

/// Outcome of the dual write for one finding.
///
/// The two stores are written independently, so any combination of
/// success and failure is possible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistReport {
    /// Row id in the relational log, if that write succeeded.
    pub row_id: Option<i64>,
    /// Document id in the search index, if that write succeeded.
    pub doc_id: Option<String>,
    /// Errors per store.
    pub errors: Vec<(StoreKind, String)>,
}

impl PersistReport {
    /// Both stores accepted the finding.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Exactly one store accepted the finding.
    pub fn is_partial(&self) -> bool {
        self.row_id.is_some() != self.doc_id.is_some()
    }

    pub fn failed(&self, store: StoreKind) -> bool {
        self.errors.iter().any(|(kind, _)| *kind == store)
    }
}

/// Result of annotating an inventory record.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationOutcome {
    /// The first matching record's description was overwritten.
    Updated { record_id: u64 },
    /// No inventory record matches the address; nothing was written.
    NotFound,
    /// Every attempt failed.
    Failed { error: String },
}
