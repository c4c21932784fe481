//! Mock HookClient for unit testing
//!
//! This module provides a mock implementation of HookClientTrait that can be used
//! in unit tests without requiring a running hook service.

use crate::error::{DeclaredError, HookError};
use crate::hook_trait::HookClientTrait;
use crate::models::{HookObjectRef, HookPhase, HookResponse};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Scripted reply of the mock
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 2xx with the given body
    Respond(HookResponse),
    /// Non-2xx status with the given body
    Fail {
        /// HTTP status code
        code: u16,
        /// Response body
        body: String,
    },
}

impl MockReply {
    /// A 2xx reply whose body declares `error`
    pub fn declared(message: &str, permanent: bool, continue_: bool) -> Self {
        Self::Respond(HookResponse {
            error: Some(DeclaredError {
                message: message.to_string(),
                permanent,
                continue_,
            }),
            ..Default::default()
        })
    }
}

/// Mock HookClient for testing
///
/// Replies are consumed in order; once exhausted every call answers with an
/// empty 2xx response. Every call is recorded.
#[derive(Debug, Clone)]
pub struct MockHookClient {
    url: String,
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    calls: Arc<Mutex<Vec<(HookPhase, HookObjectRef)>>>,
}

impl MockHookClient {
    /// Create a new mock client
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            replies: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a reply (for test setup)
    pub fn push_reply(&self, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// All calls made so far
    pub fn calls(&self) -> Vec<(HookPhase, HookObjectRef)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next(&self, phase: HookPhase, object: &HookObjectRef) -> Result<HookResponse, HookError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((phase, object.clone()));
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match reply {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail { code, body }) => Err(HookError::Status { code, body }),
            None => Ok(HookResponse::default()),
        }
    }
}

#[async_trait::async_trait]
impl HookClientTrait for MockHookClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn pre_reconcile(&self, object: &HookObjectRef) -> Result<HookResponse, HookError> {
        self.next(HookPhase::PreReconcile, object)
    }

    async fn finalize(&self, object: &HookObjectRef) -> Result<(), HookError> {
        self.next(HookPhase::Finalize, object).map(|_| ())
    }
}
