//! Deployment form factor
//!
//! Renders one Deployment per instance, plus a Service when the registration
//! asks for one. The instance address is the Service's cluster DNS name.

use super::{CONTAINER_NAME, Candidate, Candidates, FormFactorReconciler, child_labels, child_meta};
use crate::error::ControllerError;
use component_core::StatusManager;
use crds::{Condition, DeploymentFormFactor, ServiceSettings};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::{ApiResource, TypeMeta};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

/// Deployment availability condition
pub const CONDITION_DEPLOYMENT_READY: &str = "DeploymentReady";

/// Service existence condition
pub const CONDITION_SERVICE_READY: &str = "ServiceReady";

/// Reason when fewer replicas are available than desired
pub const REASON_DEPLOYMENT_NOT_READY: &str = "DEPLOYMENTNOTREADY";

const REASON_DEPLOYMENT_AVAILABLE: &str = "DEPLOYMENTAVAILABLE";
const REASON_SERVICE_CREATED: &str = "SERVICECREATED";

/// Builds Deployment and Service objects for instances
#[derive(Debug, Clone)]
pub struct DeploymentTemplate {
    /// apiVersion/kind of the owning instances
    pub owner: TypeMeta,
    /// Container image
    pub image: String,
    /// Container port
    pub port: Option<i32>,
    /// Form factor settings
    pub settings: DeploymentFormFactor,
}

impl DeploymentTemplate {
    /// Deployment, plus Service when one is configured
    pub fn child_resources(&self) -> Vec<ApiResource> {
        let mut resources = vec![ApiResource::erase::<Deployment>(&())];
        if self.settings.service.is_some() {
            resources.push(ApiResource::erase::<Service>(&()));
        }
        resources
    }

    fn replicas(&self) -> i32 {
        self.settings.replicas.unwrap_or(1)
    }

    /// Port the container listens on: explicit, else the Service target port
    fn container_port(&self) -> Option<i32> {
        self.port.or_else(|| {
            self.settings
                .service
                .as_ref()
                .map(|s| s.target_port.unwrap_or(s.port))
        })
    }

    /// Deployment for `instance`
    pub fn deployment(&self, instance: &DynamicObject, env: &[EnvVar]) -> Result<Deployment, ControllerError> {
        let metadata = child_meta(instance, &self.owner)?;
        let labels = child_labels(instance);

        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(self.image.clone()),
            env: (!env.is_empty()).then(|| env.to_vec()),
            ports: self.container_port().map(|port| {
                vec![ContainerPort {
                    container_port: port,
                    ..Default::default()
                }]
            }),
            ..Default::default()
        };

        Ok(Deployment {
            metadata,
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas()),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        })
    }

    /// Service for `instance`, if one is configured
    pub fn service(&self, instance: &DynamicObject) -> Result<Option<Service>, ControllerError> {
        let Some(settings) = &self.settings.service else {
            return Ok(None);
        };
        Ok(Some(Service {
            metadata: child_meta(instance, &self.owner)?,
            spec: Some(service_spec(instance, settings)),
            status: None,
        }))
    }
}

fn service_spec(instance: &DynamicObject, settings: &ServiceSettings) -> ServiceSpec {
    ServiceSpec {
        selector: Some(child_labels(instance)),
        ports: Some(vec![ServicePort {
            name: Some("http".to_string()),
            port: settings.port,
            target_port: Some(IntOrString::Int(settings.target_port.unwrap_or(settings.port))),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// DeploymentReady from an applied Deployment
pub fn deployment_condition(deployment: &Deployment) -> Condition {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);

    if available >= desired {
        Condition::ok(CONDITION_DEPLOYMENT_READY, REASON_DEPLOYMENT_AVAILABLE)
    } else {
        Condition::failed(
            CONDITION_DEPLOYMENT_READY,
            REASON_DEPLOYMENT_NOT_READY,
            format!("{available}/{desired} replicas available"),
        )
    }
}

/// Cluster DNS address of a Service
pub fn service_address(name: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("http://{name}.{namespace}.svc.{cluster_domain}")
}

/// Deployment (+ Service) form factor
#[derive(Clone)]
pub struct DeploymentReconciler {
    client: Client,
    template: DeploymentTemplate,
    field_manager: String,
    cluster_domain: String,
}

impl std::fmt::Debug for DeploymentReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentReconciler")
            .field("template", &self.template)
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl DeploymentReconciler {
    /// Creates the form factor
    pub fn new(
        client: Client,
        template: DeploymentTemplate,
        field_manager: impl Into<String>,
        cluster_domain: impl Into<String>,
    ) -> Self {
        Self {
            client,
            template,
            field_manager: field_manager.into(),
            cluster_domain: cluster_domain.into(),
        }
    }

    fn params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }
}

#[async_trait::async_trait]
impl FormFactorReconciler for DeploymentReconciler {
    fn condition_types(&self) -> Vec<String> {
        let mut types = vec![CONDITION_DEPLOYMENT_READY.to_string()];
        if self.template.settings.service.is_some() {
            types.push(CONDITION_SERVICE_READY.to_string());
        }
        types
    }

    fn child_resources(&self) -> Vec<ApiResource> {
        self.template.child_resources()
    }

    fn prerender(&self, instance: &DynamicObject, env: &[EnvVar]) -> Result<Candidates, ControllerError> {
        let mut items = vec![Candidate::Deployment(Box::new(self.template.deployment(instance, env)?))];
        if let Some(service) = self.template.service(instance)? {
            items.push(Candidate::Service(Box::new(service)));
        }
        Ok(Candidates::new(items))
    }

    async fn reconcile(
        &self,
        instance: &DynamicObject,
        candidates: Candidates,
        status: &mut StatusManager,
    ) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();
        let name = instance.name_any();

        for candidate in candidates {
            match candidate {
                Candidate::Deployment(deployment) => {
                    let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
                    let applied = api.patch(&name, &self.params(), &Patch::Apply(&*deployment)).await?;
                    debug!("Applied Deployment {}/{}", namespace, name);
                    status.set_condition(deployment_condition(&applied));
                }
                Candidate::Service(service) => {
                    let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
                    api.patch(&name, &self.params(), &Patch::Apply(&*service)).await?;
                    debug!("Applied Service {}/{}", namespace, name);
                    status.set_condition(Condition::ok(CONDITION_SERVICE_READY, REASON_SERVICE_CREATED));
                    let address = service_address(&name, &namespace, &self.cluster_domain);
                    if status.get_address_url() != Some(address.as_str()) {
                        info!("Instance {}/{} is addressable at {}", namespace, name, address);
                        status.set_address_url(&address);
                    }
                }
                Candidate::KnativeService(_) => {
                    return Err(ControllerError::InvalidConfig(
                        "Knative Service candidate passed to the Deployment form factor".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
