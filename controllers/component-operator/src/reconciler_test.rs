//! Reconcile pass tests against the in-memory store and a mocked hook

use super::*;
use crate::test_utils::{MemoryStore, NoResolver, RecordingFormFactor, create_test_instance, dog_type};
use component_core::{ConditionSet, StatusCapabilities};
use crds::{ParameterConfiguration, REASON_CONDITIONS_NOT_OK, REASON_CONDITIONS_OK, StatusConfiguration};
use hook_client::{HookContainer, HookPhase, HookPodSpec, HookStatus, HookWorkload, MockHookClient, MockReply};
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use std::collections::BTreeMap;

const DEPLOYMENT_READY: &str = "DeploymentReady";
const VACCINATED: &str = "Vaccinated";

fn deployment_ready() -> Arc<RecordingFormFactor> {
    Arc::new(RecordingFormFactor::new(Condition::ok(DEPLOYMENT_READY, "DEPLOYMENTAVAILABLE")))
}

fn hook(mock: &Arc<MockHookClient>, finalize: bool) -> HookBinding {
    HookBinding {
        client: mock.clone(),
        pre_reconcile: true,
        finalize,
        conditions: vec![VACCINATED.to_string()],
    }
}

fn reconciler(
    store: &Arc<MemoryStore>,
    form_factor: &Arc<RecordingFormFactor>,
    hook: Option<HookBinding>,
) -> InstanceReconciler {
    let mut conditions = form_factor.condition_types();
    if let Some(hook) = &hook {
        conditions.extend(hook.conditions.iter().cloned());
    }
    let renderer = FieldRenderer::new(
        ParameterConfiguration::default(),
        StatusConfiguration::default(),
        Arc::new(NoResolver),
    );
    InstanceReconciler::new(
        dog_type(),
        store.clone(),
        renderer,
        StatusManagerFactory::new(StatusCapabilities::all(), ConditionSet::new("Ready", conditions)),
        form_factor.clone(),
        Vec::new(),
        hook,
    )
}

fn danny() -> DynamicObject {
    create_test_instance("danny", json!({"name": "danny", "skills": {"cooking": false}}))
}

fn deleting(mut instance: DynamicObject) -> DynamicObject {
    let meta: ObjectMeta = serde_json::from_value(json!({"deletionTimestamp": "2026-01-01T00:00:00Z"})).unwrap();
    instance.metadata.deletion_timestamp = meta.deletion_timestamp;
    instance.metadata.finalizers = Some(vec![INSTANCE_FINALIZER.to_string()]);
    instance
}

fn condition<'a>(status: &'a Value, type_: &str) -> &'a Value {
    status["conditions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["type"] == type_)
        .unwrap()
}

fn pair(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

#[tokio::test]
async fn test_danny_renders_env_and_becomes_ready() {
    let store = Arc::new(MemoryStore::default());
    store.put(danny());
    let form_factor = deployment_ready();
    let reconciler = reconciler(&store, &form_factor, None);

    let action = reconciler.reconcile(Some("pets"), "danny").await.unwrap();
    assert_eq!(action, Action::await_change());

    let applied = form_factor.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].env, vec![pair("NAME", "danny"), pair("SKILLS_COOKING", "false")]);
    assert_eq!(applied[0].service_account, None);

    let writes = store.status_writes();
    assert_eq!(writes.len(), 1);
    let status = &writes[0];
    assert_eq!(status["observedGeneration"], 1);
    assert_eq!(condition(status, DEPLOYMENT_READY)["status"], "True");
    assert_eq!(condition(status, "Ready")["status"], "True");
    assert_eq!(condition(status, "Ready")["reason"], REASON_CONDITIONS_OK);
}

#[tokio::test]
async fn test_unchanged_status_is_not_written_again() {
    let store = Arc::new(MemoryStore::default());
    store.put(danny());
    let form_factor = deployment_ready();
    let reconciler = reconciler(&store, &form_factor, None);

    reconciler.reconcile(Some("pets"), "danny").await.unwrap();
    reconciler.reconcile(Some("pets"), "danny").await.unwrap();

    assert_eq!(form_factor.applied().len(), 2);
    assert_eq!(store.status_writes().len(), 1);
}

#[tokio::test]
async fn test_unready_instance_is_requeued() {
    let store = Arc::new(MemoryStore::default());
    store.put(danny());
    let form_factor = Arc::new(RecordingFormFactor::new(Condition::failed(
        DEPLOYMENT_READY,
        "DEPLOYMENTNOTREADY",
        "0/1 replicas available",
    )));
    let reconciler = reconciler(&store, &form_factor, None);

    let action = reconciler.reconcile(Some("pets"), "danny").await.unwrap();
    assert_eq!(action, Action::requeue(NOT_READY_REQUEUE));
    let status = &store.status_writes()[0];
    assert_eq!(condition(status, "Ready")["reason"], REASON_CONDITIONS_NOT_OK);
}

#[tokio::test]
async fn test_missing_instance_is_a_no_op() {
    let store = Arc::new(MemoryStore::default());
    let form_factor = deployment_ready();
    let reconciler = reconciler(&store, &form_factor, None);

    let action = reconciler.reconcile(Some("pets"), "ghost").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(form_factor.applied().is_empty());
    assert!(store.status_writes().is_empty());
}

#[tokio::test]
async fn test_permanent_hook_error_stops_without_requeue() {
    let store = Arc::new(MemoryStore::default());
    store.put(danny());
    let form_factor = deployment_ready();
    let mock = Arc::new(MockHookClient::new("http://vet.pets.svc"));
    mock.push_reply(MockReply::declared("vet says no", true, false));
    let reconciler = reconciler(&store, &form_factor, Some(hook(&mock, false)));

    let error = reconciler.reconcile(Some("pets"), "danny").await.unwrap_err();
    assert!(error.is_permanent());
    assert_eq!(reconciler.error_policy(Some("pets"), "danny", &error), Action::await_change());
    assert!(form_factor.applied().is_empty());

    let status = &store.status_writes()[0];
    let vaccinated = condition(status, VACCINATED);
    assert_eq!(vaccinated["status"], "Unknown");
    assert_eq!(vaccinated["reason"], REASON_HOOK_ERROR);
    assert_eq!(vaccinated["message"], "hook error: vet says no");
    assert_eq!(condition(status, "Ready")["status"], "False");
}

#[tokio::test]
async fn test_continue_hook_error_still_applies_workload() {
    let store = Arc::new(MemoryStore::default());
    store.put(danny());
    let form_factor = deployment_ready();
    let mock = Arc::new(MockHookClient::new("http://vet.pets.svc"));
    mock.push_reply(MockReply::declared("vaccine backordered", false, true));
    let reconciler = reconciler(&store, &form_factor, Some(hook(&mock, false)));

    let error = reconciler.reconcile(Some("pets"), "danny").await.unwrap_err();
    assert!(!error.is_permanent());
    assert_eq!(form_factor.applied().len(), 1);
    assert_eq!(
        reconciler.error_policy(Some("pets"), "danny", &error),
        Action::requeue(Duration::from_secs(60))
    );
}

#[tokio::test]
async fn test_hook_transport_failure_stops_and_retries() {
    let store = Arc::new(MemoryStore::default());
    store.put(danny());
    let form_factor = deployment_ready();
    let mock = Arc::new(MockHookClient::new("http://vet.pets.svc"));
    mock.push_reply(MockReply::Fail {
        code: 503,
        body: "unavailable".to_string(),
    });
    let reconciler = reconciler(&store, &form_factor, Some(hook(&mock, false)));

    let error = reconciler.reconcile(Some("pets"), "danny").await.unwrap_err();
    assert!(!error.is_permanent());
    assert!(form_factor.applied().is_empty());
    let status = &store.status_writes()[0];
    assert_eq!(condition(status, VACCINATED)["reason"], REASON_HOOK_ERROR);
}

#[tokio::test]
async fn test_hook_contributes_env_service_account_and_status() {
    let store = Arc::new(MemoryStore::default());
    store.put(create_test_instance("danny", json!({"name": "danny"})));
    let form_factor = deployment_ready();
    let mock = Arc::new(MockHookClient::new("http://vet.pets.svc"));
    mock.push_reply(MockReply::Respond(HookResponse {
        error: None,
        workload: Some(HookWorkload {
            pod_spec: Some(HookPodSpec {
                containers: vec![HookContainer {
                    name: None,
                    env: vec![EnvVar {
                        name: "TOKEN".to_string(),
                        value: Some("abc".to_string()),
                        ..Default::default()
                    }],
                }],
            }),
            service_account: Some("dog-walker".to_string()),
        }),
        status: Some(HookStatus {
            conditions: vec![Condition::ok(VACCINATED, "VACCINATED")],
            annotations: BTreeMap::from([("vet".to_string(), "dr-who".to_string())]),
        }),
    }));
    let reconciler = reconciler(&store, &form_factor, Some(hook(&mock, true)));

    let action = reconciler.reconcile(Some("pets"), "danny").await.unwrap();
    assert_eq!(action, Action::await_change());

    let applied = &form_factor.applied()[0];
    assert!(applied.env.contains(&pair("TOKEN", "abc")));
    assert!(applied.env.contains(&pair("NAME", "danny")));
    assert_eq!(applied.service_account.as_deref(), Some("dog-walker"));

    assert_eq!(store.finalizer_writes(), vec![vec![INSTANCE_FINALIZER.to_string()]]);
    let status = &store.status_writes()[0];
    assert_eq!(status["annotations"]["vet"], "dr-who");
    assert_eq!(condition(status, VACCINATED)["status"], "True");
    assert_eq!(condition(status, "Ready")["status"], "True");

    let calls = mock.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, HookPhase::PreReconcile);
    assert_eq!(calls[0].1.namespace, "pets");
}

#[tokio::test]
async fn test_unreported_hook_condition_defaults_to_unknown() {
    let store = Arc::new(MemoryStore::default());
    store.put(danny());
    let form_factor = deployment_ready();
    let mock = Arc::new(MockHookClient::new("http://vet.pets.svc"));
    let reconciler = reconciler(&store, &form_factor, Some(hook(&mock, false)));

    let action = reconciler.reconcile(Some("pets"), "danny").await.unwrap();
    assert_eq!(action, Action::requeue(NOT_READY_REQUEUE));
    let status = &store.status_writes()[0];
    assert_eq!(condition(status, VACCINATED)["status"], "Unknown");
    assert_eq!(condition(status, VACCINATED)["reason"], "UNKNOWN");
    assert_eq!(condition(status, "Ready")["status"], "False");
}

#[tokio::test]
async fn test_failed_finalize_keeps_finalizer() {
    let store = Arc::new(MemoryStore::default());
    store.put(deleting(danny()));
    let form_factor = deployment_ready();
    let mock = Arc::new(MockHookClient::new("http://vet.pets.svc"));
    mock.push_reply(MockReply::Fail {
        code: 500,
        body: "boom".to_string(),
    });
    let reconciler = reconciler(&store, &form_factor, Some(hook(&mock, true)));

    let error = reconciler.reconcile(Some("pets"), "danny").await.unwrap_err();
    assert!(matches!(error, ControllerError::Hook(_)));
    assert!(store.finalizer_writes().is_empty());
    assert_eq!(mock.calls()[0].0, HookPhase::Finalize);
    assert!(form_factor.applied().is_empty());
}

#[tokio::test]
async fn test_successful_finalize_removes_finalizer() {
    let store = Arc::new(MemoryStore::default());
    store.put(deleting(danny()));
    let form_factor = deployment_ready();
    let mock = Arc::new(MockHookClient::new("http://vet.pets.svc"));
    let reconciler = reconciler(&store, &form_factor, Some(hook(&mock, true)));

    let action = reconciler.reconcile(Some("pets"), "danny").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(store.finalizer_writes(), vec![Vec::<String>::new()]);
    let object = store.object("pets", "danny").unwrap();
    assert!(object.finalizers().is_empty());
    assert!(form_factor.applied().is_empty());
}

#[tokio::test]
async fn test_deletion_without_finalizer_is_a_no_op() {
    let store = Arc::new(MemoryStore::default());
    let mut instance = deleting(danny());
    instance.metadata.finalizers = None;
    store.put(instance);
    let form_factor = deployment_ready();
    let reconciler = reconciler(&store, &form_factor, None);

    let action = reconciler.reconcile(Some("pets"), "danny").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(store.finalizer_writes().is_empty());
    assert!(store.status_writes().is_empty());
}

#[tokio::test]
async fn test_deletion_releases_finalizer_once_finalize_hook_is_gone() {
    let store = Arc::new(MemoryStore::default());
    store.put(deleting(danny()));
    let form_factor = deployment_ready();
    let mock = Arc::new(MockHookClient::new("http://vet.pets.svc"));
    let reconciler = reconciler(&store, &form_factor, Some(hook(&mock, false)));

    let action = reconciler.reconcile(Some("pets"), "danny").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(store.finalizer_writes(), vec![Vec::<String>::new()]);
    assert!(store.object("pets", "danny").unwrap().finalizers().is_empty());
    assert!(mock.calls().is_empty());
    assert!(form_factor.applied().is_empty());
}

#[tokio::test]
async fn test_live_instance_drops_stale_finalizer() {
    let store = Arc::new(MemoryStore::default());
    let mut instance = danny();
    instance.metadata.finalizers = Some(vec!["example.com/keep".to_string(), INSTANCE_FINALIZER.to_string()]);
    store.put(instance);
    let form_factor = deployment_ready();
    let reconciler = reconciler(&store, &form_factor, None);

    reconciler.reconcile(Some("pets"), "danny").await.unwrap();
    assert_eq!(store.finalizer_writes(), vec![vec!["example.com/keep".to_string()]]);
    assert_eq!(form_factor.applied().len(), 1);
}
