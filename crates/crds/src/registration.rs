//! Registration Custom Resource Definition
//!
//! A `Registration` tells the operator which CRD to manage and how each
//! instance of it becomes a running workload: the container image, the
//! workload shape (form factor), how spec fields render into parameters,
//! how status is assembled, and an optional external hook.

use crate::conditions::Condition;
use crate::parameters::{ParameterConfiguration, StatusConfiguration};
use crate::references::Destination;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registration condition: the target CRD and version were found
pub const CONDITION_CRD_FOUND: &str = "CrdFound";

/// Registration condition: the hook address resolved to a URL
pub const CONDITION_HOOK_RESOLVED: &str = "HookResolved";

/// Registration condition: an instance controller is running for the CRD
pub const CONDITION_CONTROLLER_RUNNING: &str = "ControllerRunning";

/// Condition types tracked on every registration (the happy one is "Ready")
pub const REGISTRATION_CONDITIONS: [&str; 3] = [
    CONDITION_CRD_FOUND,
    CONDITION_HOOK_RESOLVED,
    CONDITION_CONTROLLER_RUNNING,
];

/// RegistrationSpec defines which CRD is managed and how
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "genop.microscaler.io",
    version = "v1alpha1",
    kind = "Registration",
    status = "RegistrationStatus",
    shortname = "reg",
    printcolumn = r#"{"name":"CRD","type":"string","jsonPath":".spec.crd.name"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSpec {
    /// Target CRD
    pub crd: CrdReference,

    /// How instances are projected into a workload
    pub workload: Workload,

    /// Optional external lifecycle hook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookSpec>,
}

/// Identifies the managed CRD
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CrdReference {
    /// Name of the CustomResourceDefinition object (e.g., "dogs.example.com")
    pub name: String,

    /// Served version to manage (defaults to the storage version)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Workload projection for instances of the managed CRD
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    /// Workload shape
    pub form_factor: FormFactor,

    /// Container image (repository and tag)
    pub image: String,

    /// Container port exposed by the workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Spec-to-parameter rendering rules
    #[serde(default)]
    pub parameter_configuration: ParameterConfiguration,

    /// Status assembly rules
    #[serde(default)]
    pub status_configuration: StatusConfiguration,
}

/// Workload shape; exactly one variant must be set
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FormFactor {
    /// Render a Deployment (and optionally a Service)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentFormFactor>,

    /// Render a Knative Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knative_service: Option<KnativeServiceFormFactor>,
}

/// Resolved form factor variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFactorKind<'a> {
    /// Deployment plus optional Service
    Deployment(&'a DeploymentFormFactor),
    /// Knative Service
    KnativeService(&'a KnativeServiceFormFactor),
}

impl FormFactor {
    /// Returns the configured variant, or `None` if zero or both are set
    pub fn kind(&self) -> Option<FormFactorKind<'_>> {
        match (&self.deployment, &self.knative_service) {
            (Some(d), None) => Some(FormFactorKind::Deployment(d)),
            (None, Some(k)) => Some(FormFactorKind::KnativeService(k)),
            _ => None,
        }
    }
}

/// Deployment form factor
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentFormFactor {
    /// Desired replicas (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Expose the deployment through a Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSettings>,
}

/// Service exposed in front of a Deployment
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSettings {
    /// Service port
    pub port: i32,

    /// Container port (defaults to `port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
}

/// Knative Service form factor
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KnativeServiceFormFactor {
    /// `autoscaling.knative.dev/min-scale`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_scale: Option<i32>,

    /// `autoscaling.knative.dev/max-scale`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scale: Option<i32>,
}

/// External hook descriptor
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HookSpec {
    /// Where the hook is served
    pub address: Destination,

    /// Lifecycle phases the hook intercepts
    #[serde(default)]
    pub capabilities: Vec<HookCapability>,

    /// Condition types owned by the hook
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,

    /// Per-call HTTP timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl HookSpec {
    /// True if the hook declares `capability`
    pub fn has(&self, capability: HookCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Phases a hook can intercept
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum HookCapability {
    /// Called before local reconciliation of a live instance
    PreReconcile,
    /// Called while an instance is being deleted
    Finalize,
}

/// RegistrationStatus defines the observed state of a registration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatus {
    /// Registration conditions (CrdFound, HookResolved, ControllerRunning, Ready)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Free-form annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Generation last processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    fn spec_json() -> serde_json::Value {
        serde_json::json!({
            "crd": {"name": "dogs.example.com"},
            "workload": {
                "formFactor": {"deployment": {"replicas": 2, "service": {"port": 80, "targetPort": 8080}}},
                "image": "ghcr.io/example/dog:1.0",
                "parameterConfiguration": {"defaultPrefix": "DOG_"},
                "statusConfiguration": {"conditions": ["Fed"]},
            },
            "hook": {
                "address": {"uri": "http://hook.example.svc"},
                "capabilities": ["pre-reconcile", "finalize"],
                "conditions": ["Vaccinated"],
            },
        })
    }

    #[test]
    fn test_registration_spec_parses() {
        let spec: RegistrationSpec = serde_json::from_value(spec_json()).unwrap();
        assert_eq!(spec.crd.name, "dogs.example.com");
        assert!(matches!(spec.workload.form_factor.kind(), Some(FormFactorKind::Deployment(d)) if d.replicas == Some(2)));
        let hook = spec.hook.unwrap();
        assert!(hook.has(HookCapability::PreReconcile));
        assert!(hook.has(HookCapability::Finalize));
    }

    #[test]
    fn test_form_factor_requires_exactly_one_variant() {
        assert_eq!(FormFactor::default().kind(), None);
        let both = FormFactor {
            deployment: Some(DeploymentFormFactor::default()),
            knative_service: Some(KnativeServiceFormFactor::default()),
        };
        assert_eq!(both.kind(), None);
    }

    #[test]
    fn test_registration_is_cluster_scoped() {
        assert_eq!(Registration::group(&()), "genop.microscaler.io");
        assert_eq!(Registration::kind(&()), "Registration");
        assert_eq!(Registration::plural(&()), "registrations");
    }
}
