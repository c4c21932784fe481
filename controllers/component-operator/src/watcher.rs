//! Kubernetes resource watchers.
//!
//! Registrations are watched by one long-lived loop. Every registered CRD
//! gets its own dynamic instance loop, started through [`KubeLauncher`] and
//! stopped when the registry fires its shutdown signal.
//!
//! Both loops use `kube_runtime::Controller`, which handles reconnection,
//! single-flight per object key and requeues.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::form_factor::{FormFactorReconciler, MANAGED_BY, MANAGED_BY_LABEL};
use crate::form_factor::deployment::{DeploymentReconciler, DeploymentTemplate};
use crate::form_factor::knative::{KnativeReconciler, KnativeTemplate};
use crate::reconciler::{HookBinding, InstanceReconciler};
use crate::registration::RegistrationReconciler;
use crate::registry::{ControllerLauncher, ControllerTarget, gvk_name};
use crate::store::KubeInstanceStore;
use component_core::{AddressResolver, ConditionSet, FieldRenderer, StatusManagerFactory};
use crds::{FormFactorKind, HookCapability, Registration};
use futures::StreamExt;
use hook_client::HookClient;
use kube::api::{Api, DynamicObject};
use kube::core::{ApiResource, TypeMeta};
use kube::{Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Events arriving within this window are batched into one reconcile
const DEBOUNCE: Duration = Duration::from_secs(5);

fn controller_config(concurrency: u16) -> ControllerConfig {
    ControllerConfig::default().debounce(DEBOUNCE).concurrency(concurrency)
}

/// Children are only ever created with the managed-by label
fn children_config() -> watcher::Config {
    watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY}"))
}

async fn reconcile_registration(
    registration: Arc<Registration>,
    ctx: Arc<RegistrationReconciler>,
) -> Result<Action, ControllerError> {
    debug!("Reconciling Registration {}", registration.name_any());
    ctx.reconcile(&registration).await
}

fn registration_error_policy(
    registration: Arc<Registration>,
    error: &ControllerError,
    ctx: Arc<RegistrationReconciler>,
) -> Action {
    ctx.error_policy(&registration, error)
}

/// Watches `Registration` objects until the stream ends
pub async fn watch_registrations(client: Client, reconciler: Arc<RegistrationReconciler>, concurrency: u16) {
    info!("Starting Registration watcher");
    let api: Api<Registration> = Api::all(client);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config(concurrency))
        .run(reconcile_registration, registration_error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((registration, _)) => debug!("Reconciled Registration {}", registration.name),
                Err(e) => error!("Controller error for Registration: {}", e),
            }
        })
        .await;
}

async fn reconcile_instance(
    instance: Arc<DynamicObject>,
    ctx: Arc<InstanceReconciler>,
) -> Result<Action, ControllerError> {
    ctx.reconcile(instance.namespace().as_deref(), &instance.name_any()).await
}

fn instance_error_policy(instance: Arc<DynamicObject>, error: &ControllerError, ctx: Arc<InstanceReconciler>) -> Action {
    ctx.error_policy(instance.namespace().as_deref(), &instance.name_any(), error)
}

/// Watches instances of `resource` until `shutdown` fires
///
/// `children` are owned kinds; a change to one of them requeues its owner.
pub async fn watch_instances(
    api: Api<DynamicObject>,
    resource: ApiResource,
    children: Vec<(Api<DynamicObject>, ApiResource)>,
    reconciler: Arc<InstanceReconciler>,
    concurrency: u16,
    shutdown: oneshot::Receiver<()>,
) {
    let kind = resource.kind.clone();
    info!("Starting {} watcher", kind);

    let mut controller = Controller::new_with(api, watcher::Config::default(), resource);
    for (child_api, child) in children {
        debug!("{} watcher also watches owned {}", kind, child.kind);
        controller = controller.owns_with(child_api, child, children_config());
    }

    controller
        .with_config(controller_config(concurrency))
        .graceful_shutdown_on(async move {
            let _ = shutdown.await;
        })
        .run(reconcile_instance, instance_error_policy, reconciler)
        .for_each(|res| {
            let kind = kind.clone();
            async move {
                match res {
                    Ok((instance, _)) => debug!("Reconciled {} {}", kind, instance.name),
                    Err(e) => error!("Controller error for {}: {}", kind, e),
                }
            }
        })
        .await;

    info!("{} watcher stopped", kind);
}

/// Starts instance controllers against the cluster
#[derive(Clone)]
pub struct KubeLauncher {
    client: Client,
    config: OperatorConfig,
    resolver: Arc<dyn AddressResolver>,
}

impl std::fmt::Debug for KubeLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeLauncher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KubeLauncher {
    /// Creates a launcher
    pub fn new(client: Client, config: OperatorConfig, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            client,
            config,
            resolver,
        }
    }

    fn form_factor(&self, owner: &TypeMeta, target: &ControllerTarget) -> Result<Arc<dyn FormFactorReconciler>, ControllerError> {
        let workload = &target.workload;
        let form_factor: Arc<dyn FormFactorReconciler> = match workload.form_factor.kind() {
            Some(FormFactorKind::Deployment(settings)) => Arc::new(DeploymentReconciler::new(
                self.client.clone(),
                DeploymentTemplate {
                    owner: owner.clone(),
                    image: workload.image.clone(),
                    port: workload.port,
                    settings: settings.clone(),
                },
                &self.config.field_manager,
                &self.config.cluster_domain,
            )),
            Some(FormFactorKind::KnativeService(settings)) => Arc::new(KnativeReconciler::new(
                self.client.clone(),
                KnativeTemplate {
                    owner: owner.clone(),
                    image: workload.image.clone(),
                    port: workload.port,
                    settings: settings.clone(),
                },
                &self.config.field_manager,
            )),
            None => {
                return Err(ControllerError::InvalidConfig(format!(
                    "registration {} has no unambiguous form factor",
                    target.owner
                )));
            }
        };
        Ok(form_factor)
    }

    fn hook(&self, target: &ControllerTarget) -> Result<Option<HookBinding>, ControllerError> {
        let Some(hook) = &target.hook else {
            return Ok(None);
        };
        let timeout = hook
            .spec
            .timeout_seconds
            .map_or(self.config.hook_timeout, Duration::from_secs);
        let client = HookClient::new(hook.url.clone(), timeout)?;
        Ok(Some(HookBinding {
            client: Arc::new(client),
            pre_reconcile: hook.spec.has(HookCapability::PreReconcile),
            finalize: hook.spec.has(HookCapability::Finalize),
            conditions: hook.spec.conditions.clone(),
        }))
    }

    /// Wires the instance reconciler for `target`
    pub fn build(&self, target: &ControllerTarget) -> Result<InstanceReconciler, ControllerError> {
        let owner = TypeMeta {
            api_version: target.resource.api_version.clone(),
            kind: target.resource.kind.clone(),
        };
        let workload = &target.workload;
        let form_factor = self.form_factor(&owner, target)?;
        let hook = self.hook(target)?;

        let status_config = &workload.status_configuration;
        let mut dependents = status_config.conditions.clone();
        dependents.extend(form_factor.condition_types());
        if let Some(hook) = &hook {
            dependents.extend(hook.conditions.iter().cloned());
        }
        let conditions = ConditionSet::new(status_config.happy_condition_type(), dependents);

        let store = Arc::new(KubeInstanceStore::new(
            self.client.clone(),
            target.resource.clone(),
            target.namespaced,
        ));
        let renderer = FieldRenderer::new(
            workload.parameter_configuration.clone(),
            status_config.clone(),
            self.resolver.clone(),
        );

        Ok(InstanceReconciler::new(
            owner,
            store,
            renderer,
            StatusManagerFactory::new(target.capabilities, conditions),
            form_factor,
            workload.parameter_configuration.add_envs.clone(),
            hook,
        ))
    }

    fn api(&self, target: &ControllerTarget) -> Api<DynamicObject> {
        match (&self.config.watch_namespace, target.namespaced) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &target.resource),
            _ => Api::all_with(self.client.clone(), &target.resource),
        }
    }

    /// Children live next to their namespaced owner
    fn child_api(&self, resource: &ApiResource) -> Api<DynamicObject> {
        match &self.config.watch_namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait::async_trait]
impl ControllerLauncher for KubeLauncher {
    async fn launch(
        &self,
        target: ControllerTarget,
        shutdown: oneshot::Receiver<()>,
    ) -> Result<JoinHandle<()>, ControllerError> {
        let reconciler = Arc::new(self.build(&target)?);
        let api = self.api(&target);
        let children = reconciler
            .child_resources()
            .into_iter()
            .map(|child| (self.child_api(&child), child))
            .collect();
        debug!("Launching controller for {}", gvk_name(&target.gvk));
        Ok(tokio::spawn(watch_instances(
            api,
            target.resource,
            children,
            reconciler,
            self.config.concurrency,
            shutdown,
        )))
    }
}
