//! Instance reads and writes
//!
//! The instance reconciler only touches the API server for its own instance
//! through [`InstanceStore`], so reconcile passes can run against an
//! in-memory store in tests.

use crate::error::ControllerError;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::{Value, json};
use tracing::debug;

/// Access to instances of one target kind
#[async_trait::async_trait]
pub trait InstanceStore: Send + Sync {
    /// Fetches an instance; `None` if it does not exist
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>, ControllerError>;

    /// Replaces the instance's status with `status`
    async fn patch_status(&self, instance: &DynamicObject, status: Value) -> Result<(), ControllerError>;

    /// Sets the instance's finalizer list
    async fn patch_finalizers(&self, instance: &DynamicObject, finalizers: Vec<String>) -> Result<(), ControllerError>;
}

/// [`InstanceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeInstanceStore {
    client: Client,
    resource: ApiResource,
    namespaced: bool,
}

impl std::fmt::Debug for KubeInstanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeInstanceStore")
            .field("resource", &self.resource)
            .field("namespaced", &self.namespaced)
            .finish_non_exhaustive()
    }
}

impl KubeInstanceStore {
    /// Store for instances of `resource`
    pub fn new(client: Client, resource: ApiResource, namespaced: bool) -> Self {
        Self {
            client,
            resource,
            namespaced,
        }
    }

    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if self.namespaced => Api::namespaced_with(self.client.clone(), ns, &self.resource),
            _ => Api::all_with(self.client.clone(), &self.resource),
        }
    }
}

#[async_trait::async_trait]
impl InstanceStore for KubeInstanceStore {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>, ControllerError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn patch_status(&self, instance: &DynamicObject, status: Value) -> Result<(), ControllerError> {
        let name = instance.name_any();
        debug!("Patching status of {} {}", self.resource.kind, name);
        // Arrays such as conditions are replaced wholesale by a merge patch
        let patch = json!({ "status": status });
        self.api(instance.namespace().as_deref())
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_finalizers(&self, instance: &DynamicObject, finalizers: Vec<String>) -> Result<(), ControllerError> {
        let name = instance.name_any();
        debug!("Setting finalizers of {} {} to {:?}", self.resource.kind, name, finalizers);
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api(instance.namespace().as_deref())
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
