//! Workload form factors
//!
//! A form factor turns a rendered instance into child objects, applies them
//! and reports their readiness through instance conditions. Two shapes exist:
//!
//! - `deployment`: a Deployment plus an optional Service
//! - `knative`: a Knative Service
//!
//! Reconciliation is split so a hook can adjust the children in between:
//! [`FormFactorReconciler::prerender`] builds [`Candidates`], the instance
//! reconciler patches env and service account into them, then
//! [`FormFactorReconciler::reconcile`] applies them.

pub mod deployment;
pub mod knative;

use crate::error::ControllerError;
use component_core::{RenderedParameters, StatusManager};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EnvVar, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::core::{ApiResource, TypeMeta};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Label naming the operator on every child
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "component-operator";

/// Label carrying the owning instance's name
pub const INSTANCE_LABEL: &str = "genop.microscaler.io/instance";

/// Name of the workload container
pub const CONTAINER_NAME: &str = "main";

/// A child object about to be applied
#[derive(Debug, Clone)]
pub enum Candidate {
    /// apps/v1 Deployment
    Deployment(Box<Deployment>),
    /// v1 Service
    Service(Box<Service>),
    /// serving.knative.dev/v1 Service
    KnativeService(Box<DynamicObject>),
}

/// Child objects rendered for one instance
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    items: Vec<Candidate>,
}

impl Candidates {
    /// Wraps rendered children
    pub fn new(items: Vec<Candidate>) -> Self {
        Self { items }
    }

    /// Children in apply order
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.items.iter()
    }

    /// Replaces the env of every workload container
    pub fn set_env(&mut self, env: &[EnvVar]) -> Result<(), ControllerError> {
        for item in &mut self.items {
            match item {
                Candidate::Deployment(deployment) => {
                    let containers = deployment
                        .spec
                        .iter_mut()
                        .filter_map(|s| s.template.spec.as_mut())
                        .flat_map(|p| p.containers.iter_mut());
                    for container in containers {
                        container.env = (!env.is_empty()).then(|| env.to_vec());
                    }
                }
                Candidate::KnativeService(service) => {
                    let env = serde_json::to_value(env)?;
                    for container in pod_spec_json(&mut service.data)
                        .and_then(|p| p.get_mut("containers"))
                        .and_then(Value::as_array_mut)
                        .into_iter()
                        .flatten()
                    {
                        if let Some(container) = container.as_object_mut() {
                            container.insert("env".to_string(), env.clone());
                        }
                    }
                }
                Candidate::Service(_) => {}
            }
        }
        Ok(())
    }

    /// Sets the pod service account of every workload
    pub fn set_service_account(&mut self, name: &str) {
        for item in &mut self.items {
            match item {
                Candidate::Deployment(deployment) => {
                    if let Some(pod) = deployment.spec.as_mut().and_then(|s| s.template.spec.as_mut()) {
                        pod.service_account_name = Some(name.to_string());
                    }
                }
                Candidate::KnativeService(service) => {
                    if let Some(pod) = pod_spec_json(&mut service.data) {
                        pod.insert("serviceAccountName".to_string(), Value::String(name.to_string()));
                    }
                }
                Candidate::Service(_) => {}
            }
        }
    }
}

impl IntoIterator for Candidates {
    type Item = Candidate;
    type IntoIter = std::vec::IntoIter<Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Renders, applies and observes the children of instances
#[async_trait::async_trait]
pub trait FormFactorReconciler: Send + Sync {
    /// Condition types this form factor reports
    fn condition_types(&self) -> Vec<String>;

    /// Kinds of the children it creates, watched so their changes wake the owner
    fn child_resources(&self) -> Vec<ApiResource>;

    /// Builds the children of `instance` with `env` as container environment
    fn prerender(&self, instance: &DynamicObject, env: &[EnvVar]) -> Result<Candidates, ControllerError>;

    /// Applies `candidates` and reports their state into `status`
    async fn reconcile(
        &self,
        instance: &DynamicObject,
        candidates: Candidates,
        status: &mut StatusManager,
    ) -> Result<(), ControllerError>;
}

/// Container environment: rendered parameters in path order, preceded by
/// static variables whose names were not rendered
pub fn workload_env(add_envs: &[EnvVar], parameters: &RenderedParameters) -> Vec<EnvVar> {
    let rendered = parameters.env_vars();
    let names: BTreeSet<&str> = rendered.iter().map(|e| e.name.as_str()).collect();
    let mut env: Vec<EnvVar> = add_envs
        .iter()
        .filter(|e| !names.contains(e.name.as_str()))
        .cloned()
        .collect();
    env.extend(rendered);
    env
}

/// Labels put on every child of `instance`
pub fn child_labels(instance: &DynamicObject) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (INSTANCE_LABEL.to_string(), instance.name_any()),
    ])
}

/// Metadata of a child: instance name and namespace, labels, controller owner reference
pub fn child_meta(instance: &DynamicObject, owner: &TypeMeta) -> Result<ObjectMeta, ControllerError> {
    let namespace = instance.namespace().ok_or_else(|| {
        ControllerError::InvalidConfig(format!(
            "{} {} is cluster-scoped; workloads need a namespaced kind",
            owner.kind,
            instance.name_any()
        ))
    })?;
    let uid = instance
        .uid()
        .ok_or_else(|| ControllerError::InvalidConfig(format!("{} {} has no uid", owner.kind, instance.name_any())))?;

    Ok(ObjectMeta {
        name: Some(instance.name_any()),
        namespace: Some(namespace),
        labels: Some(child_labels(instance)),
        owner_references: Some(vec![OwnerReference {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: instance.name_any(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]),
        ..Default::default()
    })
}

/// `spec.template.spec` of a pod-templated JSON object
fn pod_spec_json(data: &mut Value) -> Option<&mut Map<String, Value>> {
    data.pointer_mut("/spec/template/spec").and_then(Value::as_object_mut)
}
