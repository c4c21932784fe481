//! Core error types.
//!
//! Errors raised while rendering an instance spec, resolving addresses and
//! manipulating instance status documents.

use thiserror::Error;

/// Errors raised while resolving an address
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to resolve {target}: {reason}")]
pub struct ResolveError {
    /// What was being resolved (e.g. `v1/Service default/sink`)
    pub target: String,
    /// Why it failed
    pub reason: String,
}

impl ResolveError {
    /// Build a resolve error
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while rendering parameters
#[derive(Debug, Error)]
pub enum RenderError {
    /// A configured reference path has no value in the instance
    #[error("referenced path {path} not found in instance (needed by {needed_by})")]
    MissingReference {
        /// The missing path
        path: String,
        /// The path whose rule needed it
        needed_by: String,
    },

    /// A built-in function name is not in the catalogue
    #[error("unknown built-in function {name} on {path}")]
    UnknownBuiltIn {
        /// Function name
        name: String,
        /// Path carrying the rule
        path: String,
    },

    /// An address-typed field is malformed
    #[error("invalid address at {path}: {reason}")]
    InvalidAddress {
        /// Path of the address field
        path: String,
        /// What is wrong with it
        reason: String,
    },

    /// Address resolution failed
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// JSON serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// One or more status elements could not be projected
    #[error("status projection failed: {}", .0.join("; "))]
    StatusProjection(Vec<String>),
}

/// Errors raised while manipulating a status document
#[derive(Debug, Error)]
pub enum StatusError {
    /// The status value is not a JSON object
    #[error("status must be an object, got {0}")]
    NotAnObject(String),

    /// A field has an unexpected shape
    #[error("invalid status field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
