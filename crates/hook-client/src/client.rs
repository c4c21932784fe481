//! Hook HTTP client
//!
//! Implements the hook protocol over HTTP/JSON with reqwest.

use crate::error::HookError;
use crate::hook_trait::HookClientTrait;
use crate::models::{HookObjectRef, HookPhase, HookRequest, HookResponse};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Message used when a failing hook returns an empty body
const EMPTY_ERROR_BODY: &str = "hook returned an error status with an empty body";

/// Hook HTTP client
#[derive(Debug, Clone)]
pub struct HookClient {
    client: Client,
    url: String,
}

impl HookClient {
    /// Create a new hook client
    ///
    /// # Arguments
    /// * `url` - Fully resolved hook URL
    /// * `timeout` - Per-call timeout
    pub fn new(url: String, timeout: Duration) -> Result<Self, HookError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, url })
    }

    /// Posts a request for `phase` and returns the raw response body on 2xx
    async fn call(&self, object: &HookObjectRef, phase: HookPhase) -> Result<String, HookError> {
        let request = HookRequest {
            object: object.clone(),
            phase,
        };
        debug!("Calling hook {} for {} ({})", self.url, object, phase);

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("Hook {} answered {} for {} ({})", self.url, status, object, phase);

        if !status.is_success() {
            warn!("Hook {} failed for {} ({}): {}", self.url, object, phase, status);
            let body = if body.trim().is_empty() {
                EMPTY_ERROR_BODY.to_string()
            } else {
                body
            };
            return Err(HookError::Status {
                code: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait::async_trait]
impl HookClientTrait for HookClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn pre_reconcile(&self, object: &HookObjectRef) -> Result<HookResponse, HookError> {
        let body = self.call(object, HookPhase::PreReconcile).await?;
        if body.trim().is_empty() {
            return Ok(HookResponse::default());
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn finalize(&self, object: &HookObjectRef) -> Result<(), HookError> {
        self.call(object, HookPhase::Finalize).await?;
        Ok(())
    }
}
