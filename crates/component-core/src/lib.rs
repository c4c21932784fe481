//! Generic Component Operator Core
//!
//! The cluster-independent machinery that turns any CRD into a controller:
//!
//! - [`render`]: walks a schema-less instance `spec` and renders configured
//!   paths into workload parameters (environment variables) and a projected
//!   status patch.
//! - [`status`]: maintains the registered condition set on an arbitrary status
//!   document and computes the aggregate "happy" condition.
//! - [`status::capabilities`]: derives which status sub-fields a target CRD's
//!   schema supports.
//! - [`resolver`]: the address-resolution seam used by the `resolveAddress`
//!   built-in.

pub mod error;
pub mod render;
pub mod resolver;
pub mod status;

pub use error::{RenderError, ResolveError, StatusError};
pub use render::{FieldRenderer, ParsedField, ParsedSpec, RenderOutput, RenderedParameters, SpecNode};
pub use resolver::AddressResolver;
pub use status::capabilities::StatusCapabilities;
pub use status::{ConditionSet, StatusManager, StatusManagerFactory};
