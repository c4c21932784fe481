//! Status conditions
//!
//! The condition shape shared by registrations and by every managed instance.
//! Serializes exactly like `metav1.Condition` minus `observedGeneration`, so it
//! can be read from and written into arbitrary status documents.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason used for conditions that have not been observed yet
pub const REASON_UNKNOWN: &str = "UNKNOWN";

/// Reason on the happy condition when every other condition is True
pub const REASON_CONDITIONS_OK: &str = "CONDITIONSOK";

/// Reason on the happy condition when any other condition is not True
pub const REASON_CONDITIONS_NOT_OK: &str = "CONDITIONSNOTOK";

/// Reason on hook-owned conditions when the hook call failed
pub const REASON_HOOK_ERROR: &str = "HOOKERROR";

/// Default type of the aggregate condition
pub const DEFAULT_HAPPY_CONDITION: &str = "Ready";

/// Tri-state condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,

    /// Condition does not hold
    False,

    /// Condition has not been determined
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => f.write_str("True"),
            Self::False => f.write_str("False"),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

/// A single observation about an object
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g., "Ready", "DeploymentReady")
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Machine-readable reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Build a condition without a transition time; the status manager stamps it.
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            type_: type_.into(),
            status,
            reason: Some(reason.into()),
            message: (!message.is_empty()).then_some(message),
            last_transition_time: None,
        }
    }

    /// An Unknown condition with reason `UNKNOWN`
    pub fn unknown(type_: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::Unknown, REASON_UNKNOWN, "")
    }

    /// Shorthand for a True condition
    pub fn ok(type_: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True, reason, "")
    }

    /// Shorthand for a False condition
    pub fn failed(type_: impl Into<String>, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::False, reason, message)
    }

    /// True if status and reason and message match `other`
    pub fn same_state(&self, other: &Self) -> bool {
        self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}
