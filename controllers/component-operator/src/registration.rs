//! Registration reconciliation
//!
//! Turns a `Registration` into a running instance controller: looks up the
//! target CRD, picks the managed version, derives the status capabilities
//! from its schema, resolves the hook address and ensures a registry entry.
//! Progress is reported through the registration's own conditions.

use crate::backoff::BackoffTracker;
use crate::error::ControllerError;
use crate::registry::{ControllerRegistry, ControllerTarget, ResolvedHook, gvk_name};
use component_core::{AddressResolver, ConditionSet, StatusCapabilities, StatusManager, StatusManagerFactory};
use crds::{
    CONDITION_CONTROLLER_RUNNING, CONDITION_CRD_FOUND, CONDITION_HOOK_RESOLVED, Condition, DEFAULT_HAPPY_CONDITION,
    REGISTRATION_CONDITIONS, Registration,
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionVersion,
};
use kube::api::{Api, Patch, PatchParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Client, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Finalizer holding a registration until its controller is stopped
pub const REGISTRATION_FINALIZER: &str = "genop.microscaler.io/registration";

/// Requeue interval after a configuration error
pub const CONFIGURATION_REQUEUE: Duration = Duration::from_secs(300);

/// Namespace for hook references without one
const DEFAULT_HOOK_NAMESPACE: &str = "default";

const REASON_CRD_FOUND: &str = "CRDFOUND";
const REASON_CRD_NOT_FOUND: &str = "CRDNOTFOUND";
const REASON_INVALID: &str = "INVALIDREGISTRATION";
const REASON_HOOK_RESOLVED: &str = "HOOKRESOLVED";
const REASON_NO_HOOK: &str = "NOHOOK";
const REASON_HOOK_UNRESOLVED: &str = "HOOKUNRESOLVED";
const REASON_CONTROLLER_RUNNING: &str = "CONTROLLERRUNNING";
const REASON_CONTROLLER_FAILED: &str = "CONTROLLERFAILED";

/// Reconciles `Registration` objects into registry entries
pub struct RegistrationReconciler {
    client: Client,
    registry: Arc<ControllerRegistry>,
    resolver: Arc<dyn AddressResolver>,
    status: StatusManagerFactory,
    backoff: BackoffTracker,
}

impl std::fmt::Debug for RegistrationReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationReconciler")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RegistrationReconciler {
    /// Creates the reconciler
    pub fn new(client: Client, registry: Arc<ControllerRegistry>, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            client,
            registry,
            resolver,
            status: registration_status_factory(),
            backoff: BackoffTracker::default(),
        }
    }

    fn api(&self) -> Api<Registration> {
        Api::all(self.client.clone())
    }

    /// Reconciles one registration
    pub async fn reconcile(&self, registration: &Registration) -> Result<Action, ControllerError> {
        let name = registration.name_any();

        if registration.metadata.deletion_timestamp.is_some() {
            return self.cleanup(registration).await;
        }

        if !registration.finalizers().iter().any(|f| f == REGISTRATION_FINALIZER) {
            let mut finalizers = registration.finalizers().to_vec();
            finalizers.push(REGISTRATION_FINALIZER.to_string());
            self.patch_finalizers(&name, finalizers).await?;
        }

        let original = serde_json::to_value(&registration.status)?;
        let mut status = self.status.for_status(Some(&original))?;

        let result = self.register(registration, &mut status).await;
        if let Some(generation) = registration.metadata.generation {
            status.set_observed_generation(generation);
        }
        self.write_status(&name, &original, &status).await?;

        match result {
            Ok(()) => {
                self.backoff.reset(&name);
                Ok(Action::await_change())
            }
            Err(e) if e.is_configuration() => {
                warn!("Registration {} is misconfigured: {}", name, e);
                // The current spec cannot be served; stop what an earlier one started
                for gvk in self.registry.remove_owned(&name).await {
                    info!("Stopped controller for {} of misconfigured registration {}", gvk_name(&gvk), name);
                }
                Ok(Action::requeue(CONFIGURATION_REQUEUE))
            }
            Err(e) => Err(e),
        }
    }

    /// Requeue decision for a failed reconcile
    pub fn error_policy(&self, registration: &Registration, error: &ControllerError) -> Action {
        let name = registration.name_any();
        let delay = self.backoff.next(&name);
        warn!("Registration {} failed, retrying in {:?}: {}", name, delay, error);
        Action::requeue(delay)
    }

    async fn register(&self, registration: &Registration, status: &mut StatusManager) -> Result<(), ControllerError> {
        let name = registration.name_any();
        let crd_name = &registration.spec.crd.name;

        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let Some(crd) = crds.get_opt(crd_name).await? else {
            let error = ControllerError::CrdNotFound(crd_name.clone());
            status.set_condition(Condition::failed(CONDITION_CRD_FOUND, REASON_CRD_NOT_FOUND, error.to_string()));
            return Err(error);
        };

        let mut target = match target_from_crd(registration, &crd) {
            Ok(target) => target,
            Err(error) => {
                status.set_condition(Condition::failed(CONDITION_CRD_FOUND, REASON_INVALID, error.to_string()));
                return Err(error);
            }
        };
        status.set_condition(Condition::ok(CONDITION_CRD_FOUND, REASON_CRD_FOUND));

        match &registration.spec.hook {
            None => status.set_condition(Condition::ok(CONDITION_HOOK_RESOLVED, REASON_NO_HOOK)),
            Some(hook) => match self.resolver.resolve_destination(&hook.address, DEFAULT_HOOK_NAMESPACE).await {
                Ok(url) => {
                    debug!("Hook of registration {} resolved to {}", name, url);
                    status.set_condition(Condition::ok(CONDITION_HOOK_RESOLVED, REASON_HOOK_RESOLVED));
                    target.hook = Some(ResolvedHook {
                        url,
                        spec: hook.clone(),
                    });
                }
                Err(e) => {
                    status.set_condition(Condition::failed(
                        CONDITION_HOOK_RESOLVED,
                        REASON_HOOK_UNRESOLVED,
                        e.to_string(),
                    ));
                    return Err(e.into());
                }
            },
        }

        if let Err(error) = self.ensure_controller(target).await {
            status.set_condition(Condition::failed(
                CONDITION_CONTROLLER_RUNNING,
                REASON_CONTROLLER_FAILED,
                error.to_string(),
            ));
            return Err(error);
        }
        status.set_condition(Condition::ok(CONDITION_CONTROLLER_RUNNING, REASON_CONTROLLER_RUNNING));
        Ok(())
    }

    async fn ensure_controller(&self, target: ControllerTarget) -> Result<(), ControllerError> {
        // Controllers left behind by an earlier spec of this registration
        for gvk in self.registry.find_by_owner(&target.owner).await {
            if gvk != target.gvk {
                info!("Registration {} no longer manages {}", target.owner, gvk_name(&gvk));
                self.registry.remove(&gvk).await;
            }
        }

        if let Some(running) = self.registry.registered(&target.gvk).await {
            if running.owner != target.owner {
                return Err(ControllerError::InvalidConfig(format!(
                    "{} is already managed by registration {}",
                    gvk_name(&target.gvk),
                    running.owner
                )));
            }
            if running.generation != target.generation {
                info!(
                    "Registration {} changed, restarting controller for {}",
                    target.owner,
                    gvk_name(&target.gvk)
                );
                self.registry.remove(&target.gvk).await;
            }
        }

        self.registry.ensure(target).await?;
        Ok(())
    }

    async fn cleanup(&self, registration: &Registration) -> Result<Action, ControllerError> {
        let name = registration.name_any();
        self.registry.remove_owned(&name).await;

        if registration.finalizers().iter().any(|f| f == REGISTRATION_FINALIZER) {
            let finalizers: Vec<String> = registration
                .finalizers()
                .iter()
                .filter(|f| f.as_str() != REGISTRATION_FINALIZER)
                .cloned()
                .collect();
            match self.patch_finalizers(&name, finalizers).await {
                Ok(()) => info!("Registration {} released", name),
                Err(e) if e.is_not_found() => debug!("Registration {} already gone", name),
                Err(e) => return Err(e),
            }
        }
        self.backoff.reset(&name);
        Ok(Action::await_change())
    }

    async fn patch_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<(), ControllerError> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn write_status(&self, name: &str, original: &Value, status: &StatusManager) -> Result<(), ControllerError> {
        let updated = status.status()?;
        if *original == updated {
            return Ok(());
        }
        let patch = json!({ "status": updated });
        match self
            .api()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let error = ControllerError::from(e);
                if error.is_not_found() {
                    debug!("Registration {} vanished before its status was written", name);
                    Ok(())
                } else {
                    Err(error)
                }
            }
        }
    }
}

/// Status manager factory for registrations (happy condition `Ready`)
pub fn registration_status_factory() -> StatusManagerFactory {
    StatusManagerFactory::new(
        StatusCapabilities::all(),
        ConditionSet::new(DEFAULT_HAPPY_CONDITION, REGISTRATION_CONDITIONS),
    )
}

/// Served version to manage: the requested one, else the storage version
pub fn select_version<'a>(
    crd: &'a CustomResourceDefinition,
    requested: Option<&str>,
) -> Result<&'a CustomResourceDefinitionVersion, ControllerError> {
    let crd_name = crd.name_any();
    let versions = &crd.spec.versions;
    match requested {
        Some(requested) => versions
            .iter()
            .find(|v| v.name == requested && v.served)
            .ok_or_else(|| ControllerError::VersionNotFound(format!("{crd_name} does not serve {requested}"))),
        None => versions
            .iter()
            .find(|v| v.storage)
            .or_else(|| versions.iter().find(|v| v.served))
            .ok_or_else(|| ControllerError::VersionNotFound(format!("{crd_name} has no served version"))),
    }
}

/// Controller target for `registration` managing `crd` (hook unresolved)
pub fn target_from_crd(
    registration: &Registration,
    crd: &CustomResourceDefinition,
) -> Result<ControllerTarget, ControllerError> {
    let workload = &registration.spec.workload;
    if workload.form_factor.kind().is_none() {
        return Err(ControllerError::InvalidConfig(
            "exactly one of formFactor.deployment and formFactor.knativeService must be set".to_string(),
        ));
    }

    let version = select_version(crd, registration.spec.crd.version.as_deref())?;
    let capabilities = StatusCapabilities::from_crd_version(version)?;
    let names = &crd.spec.names;
    let gvk = GroupVersionKind::gvk(&crd.spec.group, &version.name, &names.kind);

    Ok(ControllerTarget {
        owner: registration.name_any(),
        generation: registration.metadata.generation,
        resource: ApiResource::from_gvk_with_plural(&gvk, &names.plural),
        gvk,
        namespaced: crd.spec.scope == "Namespaced",
        capabilities,
        workload: workload.clone(),
        hook: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::RegistrationSpec;

    fn crd() -> CustomResourceDefinition {
        let schema = json!({
            "type": "object",
            "properties": {
                "spec": {"type": "object", "x-kubernetes-preserve-unknown-fields": true},
                "status": {"type": "object", "properties": {
                    "observedGeneration": {"type": "integer"},
                }},
            },
        });
        serde_json::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "dogs.example.com"},
            "spec": {
                "group": "example.com",
                "names": {"kind": "Dog", "plural": "dogs", "singular": "dog", "listKind": "DogList"},
                "scope": "Namespaced",
                "versions": [
                    {"name": "v1alpha1", "served": true, "storage": false, "schema": {"openAPIV3Schema": schema}},
                    {"name": "v1", "served": true, "storage": true, "schema": {"openAPIV3Schema": schema}},
                    {"name": "v0", "served": false, "storage": false, "schema": {"openAPIV3Schema": schema}},
                ],
            },
        }))
        .unwrap()
    }

    fn registration(version: Option<&str>, form_factor: Value) -> Registration {
        let spec: RegistrationSpec = serde_json::from_value(json!({
            "crd": {"name": "dogs.example.com", "version": version},
            "workload": {"formFactor": form_factor, "image": "ghcr.io/example/dog:1.0"},
        }))
        .unwrap();
        let mut registration = Registration::new("dogs", spec);
        registration.metadata.generation = Some(3);
        registration
    }

    #[test]
    fn test_target_uses_storage_version_by_default() {
        let target = target_from_crd(&registration(None, json!({"deployment": {}})), &crd()).unwrap();
        assert_eq!(target.gvk, GroupVersionKind::gvk("example.com", "v1", "Dog"));
        assert_eq!(target.resource.plural, "dogs");
        assert!(target.namespaced);
        assert_eq!(target.owner, "dogs");
        assert_eq!(target.generation, Some(3));
        assert!(target.capabilities.observed_generation);
        assert!(!target.capabilities.conditions);
    }

    #[test]
    fn test_target_honors_requested_version() {
        let target = target_from_crd(&registration(Some("v1alpha1"), json!({"deployment": {}})), &crd()).unwrap();
        assert_eq!(target.gvk.version, "v1alpha1");
    }

    #[test]
    fn test_unserved_version_is_rejected() {
        let error = target_from_crd(&registration(Some("v0"), json!({"deployment": {}})), &crd()).unwrap_err();
        assert!(matches!(error, ControllerError::VersionNotFound(_)));
        assert!(error.is_configuration());
    }

    #[test]
    fn test_form_factor_must_be_unambiguous() {
        let error = target_from_crd(
            &registration(None, json!({"deployment": {}, "knativeService": {}})),
            &crd(),
        )
        .unwrap_err();
        assert!(matches!(error, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_registration_conditions() {
        let manager = registration_status_factory().for_status(None).unwrap();
        let types: Vec<&str> = manager.conditions().iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, vec!["ControllerRunning", "CrdFound", "HookResolved", "Ready"]);
        assert!(!manager.is_happy());
    }
}
