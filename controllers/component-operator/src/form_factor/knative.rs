//! Knative Service form factor
//!
//! Knative types are not part of k8s-openapi, so the Service is built and
//! applied as a [`DynamicObject`] of `serving.knative.dev/v1`.

use super::{CONTAINER_NAME, Candidate, Candidates, FormFactorReconciler, child_labels, child_meta};
use crate::error::ControllerError;
use component_core::StatusManager;
use crds::{Condition, ConditionStatus, KnativeServiceFormFactor};
use k8s_openapi::api::core::v1::EnvVar;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::{ApiResource, GroupVersionKind, TypeMeta};
use kube::{Client, ResourceExt};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

/// Knative Service readiness condition
pub const CONDITION_KNATIVE_SERVICE_READY: &str = "KnativeServiceReady";

const MIN_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/min-scale";
const MAX_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/max-scale";

/// `serving.knative.dev/v1` `Service`
pub fn knative_service_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("serving.knative.dev", "v1", "Service"), "services")
}

/// Builds Knative Services for instances
#[derive(Debug, Clone)]
pub struct KnativeTemplate {
    /// apiVersion/kind of the owning instances
    pub owner: TypeMeta,
    /// Container image
    pub image: String,
    /// Container port
    pub port: Option<i32>,
    /// Form factor settings
    pub settings: KnativeServiceFormFactor,
}

impl KnativeTemplate {
    fn scale_annotations(&self) -> Map<String, Value> {
        let mut annotations = Map::new();
        if let Some(min) = self.settings.min_scale {
            annotations.insert(MIN_SCALE_ANNOTATION.to_string(), Value::String(min.to_string()));
        }
        if let Some(max) = self.settings.max_scale {
            annotations.insert(MAX_SCALE_ANNOTATION.to_string(), Value::String(max.to_string()));
        }
        annotations
    }

    /// Knative Service for `instance`
    pub fn service(&self, instance: &DynamicObject, env: &[EnvVar]) -> Result<DynamicObject, ControllerError> {
        let metadata = child_meta(instance, &self.owner)?;
        let resource = knative_service_resource();

        let mut container = json!({
            "name": CONTAINER_NAME,
            "image": self.image,
        });
        if !env.is_empty() {
            container["env"] = serde_json::to_value(env)?;
        }
        if let Some(port) = self.port {
            container["ports"] = json!([{ "containerPort": port }]);
        }

        let mut template_meta = json!({ "labels": child_labels(instance) });
        let annotations = self.scale_annotations();
        if !annotations.is_empty() {
            template_meta["annotations"] = Value::Object(annotations);
        }

        let mut service = DynamicObject::new(&instance.name_any(), &resource).data(json!({
            "spec": {
                "template": {
                    "metadata": template_meta,
                    "spec": { "containers": [container] },
                }
            }
        }));
        service.metadata = metadata;
        Ok(service)
    }
}

/// KnativeServiceReady mirroring the Service's own `Ready` condition
pub fn knative_condition(service: &DynamicObject) -> Condition {
    let ready = service
        .data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"));

    let Some(ready) = ready else {
        return Condition::unknown(CONDITION_KNATIVE_SERVICE_READY);
    };
    let field = |name: &str| ready.get(name).and_then(Value::as_str).unwrap_or_default();
    let status = match field("status") {
        "True" => ConditionStatus::True,
        "False" => ConditionStatus::False,
        _ => ConditionStatus::Unknown,
    };
    let reason = match field("reason") {
        "" => status.to_string().to_uppercase(),
        reason => reason.to_string(),
    };
    Condition::new(CONDITION_KNATIVE_SERVICE_READY, status, reason, field("message"))
}

/// `status.url` of a Knative Service
pub fn knative_url(service: &DynamicObject) -> Option<&str> {
    service
        .data
        .pointer("/status/url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
}

/// Knative Service form factor
#[derive(Clone)]
pub struct KnativeReconciler {
    client: Client,
    template: KnativeTemplate,
    field_manager: String,
}

impl std::fmt::Debug for KnativeReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnativeReconciler")
            .field("template", &self.template)
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KnativeReconciler {
    /// Creates the form factor
    pub fn new(client: Client, template: KnativeTemplate, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            template,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait::async_trait]
impl FormFactorReconciler for KnativeReconciler {
    fn condition_types(&self) -> Vec<String> {
        vec![CONDITION_KNATIVE_SERVICE_READY.to_string()]
    }

    fn child_resources(&self) -> Vec<ApiResource> {
        vec![knative_service_resource()]
    }

    fn prerender(&self, instance: &DynamicObject, env: &[EnvVar]) -> Result<Candidates, ControllerError> {
        let service = self.template.service(instance, env)?;
        Ok(Candidates::new(vec![Candidate::KnativeService(Box::new(service))]))
    }

    async fn reconcile(
        &self,
        instance: &DynamicObject,
        candidates: Candidates,
        status: &mut StatusManager,
    ) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();
        let name = instance.name_any();
        let resource = knative_service_resource();
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &namespace, &resource);
        let params = PatchParams::apply(&self.field_manager).force();

        for candidate in candidates {
            let Candidate::KnativeService(service) = candidate else {
                return Err(ControllerError::InvalidConfig(
                    "only Knative Service candidates apply to the Knative form factor".to_string(),
                ));
            };
            let applied = api.patch(&name, &params, &Patch::Apply(&*service)).await?;
            debug!("Applied Knative Service {}/{}", namespace, name);

            status.set_condition(knative_condition(&applied));
            if let Some(url) = knative_url(&applied) {
                if status.get_address_url() != Some(url) {
                    info!("Instance {}/{} is addressable at {}", namespace, name, url);
                    status.set_address_url(url);
                }
            }
        }
        Ok(())
    }
}
