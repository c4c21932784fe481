//! HookClient trait for mocking
//!
//! This trait abstracts the HookClient to enable mocking in unit tests.
//! The concrete HookClient implements this trait, and tests can use mock implementations.

use crate::error::HookError;
use crate::models::{HookObjectRef, HookResponse};

/// Trait for hook protocol operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait HookClientTrait: Send + Sync {
    /// URL the hook is served at
    fn url(&self) -> &str;

    /// Calls the `pre-reconcile` phase and decodes the response body
    ///
    /// Transport and non-2xx failures are returned as `Err`; an error declared
    /// by the hook is returned inside `HookResponse::error`.
    async fn pre_reconcile(&self, object: &HookObjectRef) -> Result<HookResponse, HookError>;

    /// Calls the `finalize` phase; the response body is ignored
    async fn finalize(&self, object: &HookObjectRef) -> Result<(), HookError>;
}
