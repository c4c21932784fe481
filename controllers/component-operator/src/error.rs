//! Controller-specific error types.
//!
//! Wraps the errors of the core crates and the Kubernetes client, and
//! classifies them for the controllers' error policy.

use component_core::{RenderError, ResolveError, StatusError};
use hook_client::HookError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the component operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Instance spec could not be rendered
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Instance status could not be updated
    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    /// Hook call failed or the hook declared an error
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// Address resolution failed
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Target CRD does not exist
    #[error("CRD not found: {0}")]
    CrdNotFound(String),

    /// Target CRD does not serve the requested version
    #[error("CRD version not found: {0}")]
    VersionNotFound(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Controller loops did not stop within the grace period
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

impl ControllerError {
    /// True if the failed reconciliation must not be requeued
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Hook(e) if e.is_permanent())
    }

    /// True for HTTP 404 from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(KubeError::Api(ae)) if ae.code == 404)
    }

    /// True for registration configuration problems reported through status
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::CrdNotFound(_) | Self::VersionNotFound(_) | Self::Resolve(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hook_client::DeclaredError;

    fn declared(permanent: bool) -> ControllerError {
        ControllerError::Hook(HookError::Declared(DeclaredError {
            message: "boom".to_string(),
            permanent,
            continue_: false,
        }))
    }

    #[test]
    fn test_only_permanent_hook_errors_are_permanent() {
        assert!(declared(true).is_permanent());
        assert!(!declared(false).is_permanent());
        assert!(!ControllerError::Watch("gone".to_string()).is_permanent());
    }

    #[test]
    fn test_configuration_errors() {
        assert!(ControllerError::CrdNotFound("dogs.example.com".to_string()).is_configuration());
        assert!(!declared(false).is_configuration());
    }
}
