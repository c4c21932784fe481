//! Hook client errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error declared by the hook in its response body
///
/// `permanent` and `continue` are independent: `permanent` suppresses requeue
/// of the reconciliation, `continue` lets the remaining local steps run.
/// Both default to false (retry, and stop further processing).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeclaredError {
    /// Human-readable message
    pub message: String,

    /// Do not requeue the reconciliation
    #[serde(default)]
    pub permanent: bool,

    /// Keep running the remaining local reconciliation steps
    #[serde(default, rename = "continue")]
    pub continue_: bool,
}

/// Errors that can occur when calling a hook
#[derive(Debug, Error)]
pub enum HookError {
    /// Transport failure (connection refused, timeout, TLS, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Hook answered with a non-2xx status
    #[error("hook returned HTTP {code}: {body}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Response body, or a canned message when empty
        body: String,
    },

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The hook itself declared an error
    #[error("hook error: {}", .0.message)]
    Declared(DeclaredError),
}

impl HookError {
    /// True if the reconciliation must not be requeued
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Declared(e) if e.permanent)
    }

    /// True if the remaining local reconciliation steps should still run
    pub fn should_continue(&self) -> bool {
        matches!(self, Self::Declared(e) if e.continue_)
    }
}
