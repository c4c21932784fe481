//! Hook protocol wire types
//!
//! Request and response bodies exchanged with hook services.

use crate::error::DeclaredError;
use crds::Condition;
use k8s_openapi::api::core::v1::EnvVar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle phase a hook is called for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    /// Before local reconciliation of a live instance
    PreReconcile,
    /// While the instance is being deleted
    Finalize,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreReconcile => f.write_str("pre-reconcile"),
            Self::Finalize => f.write_str("finalize"),
        }
    }
}

/// The instance a hook call is about
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HookObjectRef {
    /// API version of the instance
    pub api_version: String,
    /// Kind of the instance
    pub kind: String,
    /// Namespace of the instance
    pub namespace: String,
    /// Name of the instance
    pub name: String,
}

impl HookObjectRef {
    /// Build a reference
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for HookObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Body of every hook call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HookRequest {
    /// Instance reference
    pub object: HookObjectRef,
    /// Phase being executed
    pub phase: HookPhase,
}

/// Body returned by a `pre-reconcile` call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HookResponse {
    /// Error declared by the hook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DeclaredError>,

    /// Workload fragment to merge into the rendered workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<HookWorkload>,

    /// Status fragment to merge into the instance status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HookStatus>,
}

impl HookResponse {
    /// All env vars contributed by the hook, across containers, in order
    pub fn env(&self) -> impl Iterator<Item = &EnvVar> {
        self.workload
            .iter()
            .filter_map(|w| w.pod_spec.as_ref())
            .flat_map(|p| p.containers.iter())
            .flat_map(|c| c.env.iter())
    }

    /// Service account requested by the hook
    pub fn service_account(&self) -> Option<&str> {
        self.workload.as_ref().and_then(|w| w.service_account.as_deref())
    }
}

/// Workload fragment contributed by a hook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HookWorkload {
    /// Pod-level fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<HookPodSpec>,

    /// Service account for the workload's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

/// Pod spec fragment contributed by a hook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HookPodSpec {
    /// Container fragments
    #[serde(default)]
    pub containers: Vec<HookContainer>,
}

/// Container fragment contributed by a hook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HookContainer {
    /// Container name (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Environment variables to splice in
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

/// Status fragment contributed by a hook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HookStatus {
    /// Conditions to set on the instance
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Annotations to merge into the instance status
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}
