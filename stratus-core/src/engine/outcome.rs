//! Check outcomes.
//!
//! Every rule/resource pairing lands in exactly one of three buckets:
//! PASS (condition satisfied), FAIL (condition violated), or ERROR (the
//! condition could not be evaluated). ERROR is never folded into the other
//! two - an unevaluable control is not a passing one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::inventory::Item;
use super::value::Value;
use crate::provider::ProviderKind;

/// Identity placeholder when an item carries none of the conventional
/// identity fields, or when no item exists at all (discovery failure).
pub const UNKNOWN_RESOURCE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
}

impl CheckStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, CheckStatus::Pass)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, CheckStatus::Fail)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CheckStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rule severity, ordered most to least severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" | "informational" => Ok(Severity::Info),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The outcome of one check against one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub rule_id: String,
    pub severity: Severity,
    pub resource_id: String,
    pub resource_name: String,
    #[serde(rename = "result")]
    pub status: CheckStatus,
    /// The value the condition resolved, kept for report traceability.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub evaluated_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl CheckResult {
    /// An ERROR result with no resource attached, used when discovery
    /// failed or the unit never ran.
    pub fn synthetic_error(rule_id: &str, severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity,
            resource_id: UNKNOWN_RESOURCE.to_string(),
            resource_name: UNKNOWN_RESOURCE.to_string(),
            status: CheckStatus::Error,
            evaluated_value: Value::Null,
            error_reason: Some(reason.into()),
        }
    }
}

/// Best-effort `(resource_id, resource_name)` from an item's conventional
/// identity fields.
///
/// The id prefers the provider's unique identifier (`arn` on AWS,
/// `self_link` on GCP, `uid` on Kubernetes, ...), then `id`, then `name`.
/// The name prefers `name`, then `id`, then the provider identifier.
/// Both fall back to [`UNKNOWN_RESOURCE`] rather than dropping the row.
pub fn resource_identity(provider: ProviderKind, item: &Item) -> (String, String) {
    let field = |name: &str| -> Option<String> {
        item.get(name)
            .filter(|v| !v.is_absent())
            .map(|v| v.render())
    };
    let id = field(provider.unique_id_field())
        .or_else(|| field("id"))
        .or_else(|| field("name"))
        .unwrap_or_else(|| UNKNOWN_RESOURCE.to_string());
    let name = field("name")
        .or_else(|| field("id"))
        .or_else(|| field(provider.unique_id_field()))
        .unwrap_or_else(|| UNKNOWN_RESOURCE.to_string());
    (id, name)
}
