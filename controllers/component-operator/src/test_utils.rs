//! Test utilities for unit testing reconcilers
//!
//! In-memory stand-ins for the cluster-facing seams of the instance
//! reconciler, plus helpers for building instances.

use crate::error::ControllerError;
use crate::form_factor::{CONTAINER_NAME, Candidate, Candidates, FormFactorReconciler};
use crate::store::InstanceStore;
use component_core::{AddressResolver, ResolveError, StatusManager};
use crds::{Condition, ObjectReference};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::core::{ApiResource, TypeMeta};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// apiVersion/kind of the test CRD
pub fn dog_type() -> TypeMeta {
    TypeMeta {
        api_version: "example.com/v1".to_string(),
        kind: "Dog".to_string(),
    }
}

/// A `Dog` instance in namespace `pets`
pub fn create_test_instance(name: &str, spec: Value) -> DynamicObject {
    DynamicObject {
        types: Some(dog_type()),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("pets".to_string()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            ..Default::default()
        },
        data: serde_json::json!({ "spec": spec }),
    }
}

/// Resolver that knows no addresses
#[derive(Debug, Default)]
pub struct NoResolver;

#[async_trait::async_trait]
impl AddressResolver for NoResolver {
    async fn resolve_reference(
        &self,
        reference: &ObjectReference,
        _default_namespace: &str,
    ) -> Result<String, ResolveError> {
        Err(ResolveError::new(&reference.name, "no resolver in tests"))
    }
}

/// Instances kept in memory, keyed by `namespace/name`
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, DynamicObject>>,
    status_writes: Mutex<Vec<Value>>,
    finalizer_writes: Mutex<Vec<Vec<String>>>,
}

impl MemoryStore {
    fn key(namespace: Option<&str>, name: &str) -> String {
        crate::reconciler::object_key(namespace, name)
    }

    /// Adds or replaces an instance
    pub fn put(&self, object: DynamicObject) {
        let key = Self::key(object.namespace().as_deref(), &object.name_any());
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, object);
    }

    /// Current copy of an instance
    pub fn object(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(Some(namespace), name))
            .cloned()
    }

    /// Every status written so far
    pub fn status_writes(&self) -> Vec<Value> {
        self.status_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every finalizer list written so far
    pub fn finalizer_writes(&self) -> Vec<Vec<String>> {
        self.finalizer_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl InstanceStore for MemoryStore {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>, ControllerError> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(namespace, name))
            .cloned())
    }

    async fn patch_status(&self, instance: &DynamicObject, status: Value) -> Result<(), ControllerError> {
        let key = Self::key(instance.namespace().as_deref(), &instance.name_any());
        if let Some(object) = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&key)
        {
            object.data["status"] = status.clone();
        }
        self.status_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(status);
        Ok(())
    }

    async fn patch_finalizers(&self, instance: &DynamicObject, finalizers: Vec<String>) -> Result<(), ControllerError> {
        let key = Self::key(instance.namespace().as_deref(), &instance.name_any());
        if let Some(object) = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&key)
        {
            object.metadata.finalizers = Some(finalizers.clone());
        }
        self.finalizer_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(finalizers);
        Ok(())
    }
}

/// What the recording form factor saw in one `reconcile` call
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedWorkload {
    /// Container env as `(name, value)`
    pub env: Vec<(String, String)>,
    /// Pod service account
    pub service_account: Option<String>,
}

/// Form factor that records what it would apply and reports a fixed condition
#[derive(Debug)]
pub struct RecordingFormFactor {
    condition: Condition,
    applied: Mutex<Vec<AppliedWorkload>>,
}

impl RecordingFormFactor {
    /// Reports `condition` on every reconcile
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Workloads applied so far
    pub fn applied(&self) -> Vec<AppliedWorkload> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl FormFactorReconciler for RecordingFormFactor {
    fn condition_types(&self) -> Vec<String> {
        vec![self.condition.type_.clone()]
    }

    fn child_resources(&self) -> Vec<ApiResource> {
        vec![ApiResource::erase::<Deployment>(&())]
    }

    fn prerender(&self, instance: &DynamicObject, env: &[EnvVar]) -> Result<Candidates, ControllerError> {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(instance.name_any()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: CONTAINER_NAME.to_string(),
                            env: Some(env.to_vec()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        };
        Ok(Candidates::new(vec![Candidate::Deployment(Box::new(deployment))]))
    }

    async fn reconcile(
        &self,
        _instance: &DynamicObject,
        candidates: Candidates,
        status: &mut StatusManager,
    ) -> Result<(), ControllerError> {
        for candidate in candidates {
            if let Candidate::Deployment(deployment) = candidate {
                let pod = deployment.spec.and_then(|s| s.template.spec).unwrap_or_default();
                let env = pod
                    .containers
                    .iter()
                    .flat_map(|c| c.env.iter().flatten())
                    .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
                    .collect();
                self.applied
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(AppliedWorkload {
                        env,
                        service_account: pod.service_account_name,
                    });
            }
        }
        status.set_condition(self.condition.clone());
        Ok(())
    }
}
