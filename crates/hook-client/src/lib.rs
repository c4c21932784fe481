//! Hook Protocol Client
//!
//! Client for external HTTP services that intercept the reconciliation
//! lifecycle of managed instances.
//!
//! # Protocol
//!
//! One JSON `POST` per phase per reconcile pass:
//!
//! - Request: `{"object": {"apiVersion", "kind", "namespace", "name"}, "phase": "pre-reconcile" | "finalize"}`
//! - Response (`pre-reconcile` only): optional `error` (`message`, `permanent`, `continue`),
//!   optional `workload` (container env vars, service account) and optional
//!   `status` (conditions, annotations).
//! - Any non-2xx status is an error carrying the response body.
//!
//! # Example
//!
//! ```no_run
//! use hook_client::{HookClient, HookClientTrait, HookObjectRef};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HookClient::new("http://hook.default.svc".to_string(), Duration::from_secs(30))?;
//! let object = HookObjectRef::new("example.com/v1", "Dog", "default", "danny");
//! let response = client.pre_reconcile(&object).await?;
//! if let Some(error) = response.error {
//!     println!("hook declared an error: {}", error.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod hook_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::HookClient;
pub use error::{DeclaredError, HookError};
pub use hook_trait::HookClientTrait;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockHookClient, MockReply};
