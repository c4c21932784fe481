//! Generic Component Operator CRD Definitions
//!
//! The `Registration` custom resource and the declarative types it embeds:
//! workload form factors, parameter rendering rules, status projection rules,
//! hook descriptors, references and conditions.

pub mod conditions;
pub mod error;
pub mod parameters;
pub mod references;
pub mod registration;

pub use conditions::*;
pub use error::CrdError;
pub use parameters::*;
pub use references::*;
pub use registration::*;

use kube::CustomResourceExt;

/// Renders the `Registration` CRD as a YAML document
pub fn registration_crd_yaml() -> Result<String, CrdError> {
    Ok(serde_yaml::to_string(&Registration::crd())?)
}
