//! CRD crate errors

use thiserror::Error;

/// Errors raised while producing CRD manifests
#[derive(Debug, Error)]
pub enum CrdError {
    /// YAML serialization failed
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
