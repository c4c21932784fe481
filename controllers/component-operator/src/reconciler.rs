//! Instance reconciliation
//!
//! One [`InstanceReconciler`] serves every instance of one registered CRD.
//! A pass runs strictly in order:
//!
//! 1. fetch the instance (absent: done)
//! 2. sanitize its status conditions
//! 3. deleting: run the finalize hook and drop the finalizer
//! 4. otherwise render `.spec`, prerender the children, run the
//!    pre-reconcile hook, ensure the finalizer, record the observed
//!    generation and let the form factor apply the children
//! 5. write status back only if it changed
//!
//! Errors go back to the controller queue; [`InstanceReconciler::error_policy`]
//! decides when to retry.

use crate::backoff::BackoffTracker;
use crate::error::ControllerError;
use crate::form_factor::{FormFactorReconciler, workload_env};
use crate::store::InstanceStore;
use component_core::{FieldRenderer, RenderedParameters, StatusManager, StatusManagerFactory};
use crds::{Condition, ConditionStatus, REASON_HOOK_ERROR};
use hook_client::{HookClientTrait, HookError, HookObjectRef, HookResponse};
use k8s_openapi::api::core::v1::EnvVar;
use kube::api::DynamicObject;
use kube::core::{ApiResource, TypeMeta};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Finalizer added to instances whose hook intercepts deletion
pub const INSTANCE_FINALIZER: &str = "genop.microscaler.io/finalizer";

/// Requeue interval while an instance is not happy
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(30);

/// Hook wired to one registered CRD
#[derive(Clone)]
pub struct HookBinding {
    /// Hook client
    pub client: Arc<dyn HookClientTrait>,
    /// Call the hook before local reconciliation
    pub pre_reconcile: bool,
    /// Call the hook on deletion and hold a finalizer for it
    pub finalize: bool,
    /// Condition types owned by the hook
    pub conditions: Vec<String>,
}

impl std::fmt::Debug for HookBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookBinding")
            .field("url", &self.client.url())
            .field("pre_reconcile", &self.pre_reconcile)
            .field("finalize", &self.finalize)
            .field("conditions", &self.conditions)
            .finish()
    }
}

/// Reconciles instances of one registered CRD
pub struct InstanceReconciler {
    target: TypeMeta,
    store: Arc<dyn InstanceStore>,
    renderer: FieldRenderer,
    status: StatusManagerFactory,
    form_factor: Arc<dyn FormFactorReconciler>,
    add_envs: Vec<EnvVar>,
    hook: Option<HookBinding>,
    backoff: BackoffTracker,
}

impl std::fmt::Debug for InstanceReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceReconciler")
            .field("target", &self.target)
            .field("renderer", &self.renderer)
            .field("hook", &self.hook)
            .finish_non_exhaustive()
    }
}

impl InstanceReconciler {
    /// Wires a reconciler for instances of `target`
    pub fn new(
        target: TypeMeta,
        store: Arc<dyn InstanceStore>,
        renderer: FieldRenderer,
        status: StatusManagerFactory,
        form_factor: Arc<dyn FormFactorReconciler>,
        add_envs: Vec<EnvVar>,
        hook: Option<HookBinding>,
    ) -> Self {
        Self {
            target,
            store,
            renderer,
            status,
            form_factor,
            add_envs,
            hook,
            backoff: BackoffTracker::default(),
        }
    }

    /// apiVersion/kind of the managed instances
    pub fn target(&self) -> &TypeMeta {
        &self.target
    }

    /// Kinds of the children the form factor creates
    pub fn child_resources(&self) -> Vec<ApiResource> {
        self.form_factor.child_resources()
    }

    /// Runs one pass for the instance `namespace/name`
    pub async fn reconcile(&self, namespace: Option<&str>, name: &str) -> Result<Action, ControllerError> {
        let key = object_key(namespace, name);
        let Some(instance) = self.store.get(namespace, name).await? else {
            debug!("{} {} is gone, nothing to do", self.target.kind, key);
            self.backoff.reset(&key);
            return Ok(Action::await_change());
        };

        let original = instance.data.get("status").cloned().unwrap_or(Value::Null);
        let mut status = self.status.for_status(Some(&original))?;

        if instance.metadata.deletion_timestamp.is_some() {
            let action = self.finalize(&instance).await?;
            self.backoff.reset(&key);
            return Ok(action);
        }

        let result = self.reconcile_live(&instance, &mut status).await;
        self.write_status(&instance, &original, &status).await?;
        result?;

        self.backoff.reset(&key);
        if self.status.capabilities().conditions && !status.is_happy() {
            debug!("{} {} is not ready yet, checking again in {:?}", self.target.kind, key, NOT_READY_REQUEUE);
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        }
        Ok(Action::await_change())
    }

    /// Requeue decision for a failed pass
    ///
    /// Permanent hook errors wait for the next change of the instance,
    /// everything else backs off per instance.
    pub fn error_policy(&self, namespace: Option<&str>, name: &str, error: &ControllerError) -> Action {
        let key = object_key(namespace, name);
        if error.is_permanent() {
            warn!("{} {} failed permanently, not requeueing: {}", self.target.kind, key, error);
            return Action::await_change();
        }
        let delay = self.backoff.next(&key);
        warn!("{} {} failed, retrying in {:?}: {}", self.target.kind, key, delay, error);
        Action::requeue(delay)
    }

    async fn reconcile_live(&self, instance: &DynamicObject, status: &mut StatusManager) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();

        let rendered = self.renderer.render(instance.data.get("spec"), &namespace).await?;
        status.merge(&rendered.status_patch)?;
        let mut parameters = rendered.parameters;

        let mut candidates = self
            .form_factor
            .prerender(instance, &workload_env(&self.add_envs, &parameters))?;

        let mut deferred = None;
        if let Some(hook) = self.hook.as_ref().filter(|h| h.pre_reconcile) {
            let reference = self.hook_object(instance);
            let outcome = hook.client.pre_reconcile(&reference).await;
            let (response, error) = match outcome {
                Ok(mut response) => {
                    let error = response.error.take().map(HookError::Declared);
                    (Some(response), error)
                }
                Err(e) => (None, Some(e)),
            };

            if let Some(response) = &response {
                let env_changed = apply_hook_workload(response, &mut parameters);
                if env_changed {
                    candidates.set_env(&workload_env(&self.add_envs, &parameters))?;
                }
                if let Some(account) = response.service_account() {
                    candidates.set_service_account(account);
                }
                apply_hook_status(response, status);
            }
            default_hook_conditions(&hook.conditions, response.as_ref(), error.as_ref(), status);

            if let Some(error) = error {
                if !error.should_continue() {
                    return Err(error.into());
                }
                warn!("Pre-reconcile hook for {} failed, continuing: {}", reference, error);
                deferred = Some(error);
            }
        }

        let wants_finalizer = self.hook.as_ref().is_some_and(|h| h.finalize);
        if wants_finalizer && !has_finalizer(instance) {
            let mut finalizers = instance.finalizers().to_vec();
            finalizers.push(INSTANCE_FINALIZER.to_string());
            self.store.patch_finalizers(instance, finalizers).await?;
            debug!("Added finalizer to {} {}", self.target.kind, instance.name_any());
        } else if !wants_finalizer && has_finalizer(instance) {
            // Left over from a registration that used to declare a finalize hook
            self.store.patch_finalizers(instance, without_finalizer(instance)).await?;
            debug!("Removed stale finalizer from {} {}", self.target.kind, instance.name_any());
        }

        if let Some(generation) = instance.metadata.generation {
            if status.get_observed_generation() != Some(generation) {
                status.set_observed_generation(generation);
            }
        }

        self.form_factor.reconcile(instance, candidates, status).await?;

        match deferred {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    async fn finalize(&self, instance: &DynamicObject) -> Result<Action, ControllerError> {
        if !has_finalizer(instance) {
            return Ok(Action::await_change());
        }

        let reference = self.hook_object(instance);
        match self.hook.as_ref().filter(|h| h.finalize) {
            Some(hook) => {
                if let Err(error) = hook.client.finalize(&reference).await {
                    if !error.should_continue() {
                        warn!("Finalize hook for {} failed, keeping finalizer: {}", reference, error);
                        return Err(error.into());
                    }
                    warn!("Finalize hook for {} failed, continuing: {}", reference, error);
                }
            }
            None => debug!("No finalize hook for {}, releasing finalizer", reference),
        }

        match self.store.patch_finalizers(instance, without_finalizer(instance)).await {
            Ok(()) => info!("Finalized {}", reference),
            Err(e) if e.is_not_found() => debug!("{} vanished during finalization", reference),
            Err(e) => return Err(e),
        }
        Ok(Action::await_change())
    }

    async fn write_status(
        &self,
        instance: &DynamicObject,
        original: &Value,
        status: &StatusManager,
    ) -> Result<(), ControllerError> {
        let updated = status.status()?;
        let unchanged = match original {
            Value::Null => updated.as_object().is_some_and(Map::is_empty),
            original => *original == updated,
        };
        if unchanged {
            return Ok(());
        }
        match self.store.patch_status(instance, updated).await {
            Err(e) if e.is_not_found() => {
                debug!("{} {} vanished before its status was written", self.target.kind, instance.name_any());
                Ok(())
            }
            other => other,
        }
    }

    fn hook_object(&self, instance: &DynamicObject) -> HookObjectRef {
        HookObjectRef::new(
            self.target.api_version.clone(),
            self.target.kind.clone(),
            instance.namespace().unwrap_or_default(),
            instance.name_any(),
        )
    }
}

/// `namespace/name`, or `name` for cluster-scoped objects
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

fn has_finalizer(instance: &DynamicObject) -> bool {
    instance.finalizers().iter().any(|f| f == INSTANCE_FINALIZER)
}

fn without_finalizer(instance: &DynamicObject) -> Vec<String> {
    instance
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != INSTANCE_FINALIZER)
        .cloned()
        .collect()
}

/// Splices hook env vars into the rendered parameters; true if any were given
fn apply_hook_workload(response: &HookResponse, parameters: &mut RenderedParameters) -> bool {
    let mut changed = false;
    for env in response.env() {
        if let Some(replaced) = parameters.insert_hook(env.clone()) {
            debug!("Hook env {} replaced parameter {}", env.name, replaced);
        }
        changed = true;
    }
    changed
}

fn apply_hook_status(response: &HookResponse, status: &mut StatusManager) {
    let Some(fragment) = &response.status else {
        return;
    };
    for condition in &fragment.conditions {
        status.set_condition(condition.clone());
    }
    for (key, value) in &fragment.annotations {
        status.set_annotation(key.clone(), value.clone());
    }
}

/// Hook-owned conditions the hook did not report become Unknown
fn default_hook_conditions(
    owned: &[String],
    response: Option<&HookResponse>,
    error: Option<&HookError>,
    status: &mut StatusManager,
) {
    let returned: BTreeSet<&str> = response
        .and_then(|r| r.status.as_ref())
        .map(|s| s.conditions.iter().map(|c| c.type_.as_str()).collect())
        .unwrap_or_default();

    for type_ in owned.iter().filter(|t| !returned.contains(t.as_str())) {
        let condition = match error {
            None => Condition::unknown(type_.clone()),
            Some(error) => Condition::new(type_.clone(), ConditionStatus::Unknown, REASON_HOOK_ERROR, error.to_string()),
        };
        status.set_condition(condition);
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key(Some("pets"), "danny"), "pets/danny");
        assert_eq!(object_key(None, "danny"), "danny");
    }
}
