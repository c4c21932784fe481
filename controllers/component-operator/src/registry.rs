//! Controller registry
//!
//! Keeps one running instance controller per target kind (GVK). The
//! registration reconciler ensures and removes entries concurrently; the map
//! sits behind a reader/writer lock that is never held while a controller
//! is being started or awaited.

use crate::error::ControllerError;
use component_core::StatusCapabilities;
use crds::{HookSpec, Workload};
use kube::core::{ApiResource, GroupVersionKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Hook of a registration with its address resolved
#[derive(Debug, Clone)]
pub struct ResolvedHook {
    /// URL the hook is called at
    pub url: String,
    /// Declared hook settings
    pub spec: HookSpec,
}

/// Everything needed to start an instance controller for one kind
#[derive(Debug, Clone)]
pub struct ControllerTarget {
    /// Name of the owning registration
    pub owner: String,
    /// Generation of the owning registration
    pub generation: Option<i64>,
    /// Managed kind
    pub gvk: GroupVersionKind,
    /// Managed resource (plural included)
    pub resource: ApiResource,
    /// Whether instances are namespaced
    pub namespaced: bool,
    /// Status sub-fields the CRD schema declares
    pub capabilities: StatusCapabilities,
    /// Workload projection
    pub workload: Workload,
    /// Optional hook
    pub hook: Option<ResolvedHook>,
}

/// Starts instance controllers
#[async_trait::async_trait]
pub trait ControllerLauncher: Send + Sync {
    /// Spawns a controller for `target` that stops once `shutdown` fires
    async fn launch(
        &self,
        target: ControllerTarget,
        shutdown: oneshot::Receiver<()>,
    ) -> Result<JoinHandle<()>, ControllerError>;
}

/// Owner and generation of a running controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    /// Name of the owning registration
    pub owner: String,
    /// Registration generation the controller was started for
    pub generation: Option<i64>,
}

struct Entry {
    registered: Registered,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Running instance controllers by GVK
pub struct ControllerRegistry {
    launcher: Arc<dyn ControllerLauncher>,
    entries: RwLock<HashMap<GroupVersionKind, Entry>>,
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry").finish_non_exhaustive()
    }
}

impl ControllerRegistry {
    /// Empty registry starting controllers through `launcher`
    pub fn new(launcher: Arc<dyn ControllerLauncher>) -> Self {
        Self {
            launcher,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a controller for `target` unless one already runs for its GVK
    ///
    /// Returns true if a controller was started.
    pub async fn ensure(&self, target: ControllerTarget) -> Result<bool, ControllerError> {
        let gvk = target.gvk.clone();
        if self.entries.read().await.contains_key(&gvk) {
            debug!("Controller for {} already running", gvk_name(&gvk));
            return Ok(false);
        }

        let registered = Registered {
            owner: target.owner.clone(),
            generation: target.generation,
        };
        let (shutdown, signal) = oneshot::channel();
        let handle = self.launcher.launch(target, signal).await?;

        let mut entries = self.entries.write().await;
        if entries.contains_key(&gvk) {
            // Lost a race against a concurrent ensure
            let _ = shutdown.send(());
            debug!("Controller for {} started concurrently, stopping duplicate", gvk_name(&gvk));
            return Ok(false);
        }
        entries.insert(
            gvk.clone(),
            Entry {
                registered,
                shutdown,
                handle,
            },
        );
        info!("Started controller for {}", gvk_name(&gvk));
        Ok(true)
    }

    /// Stops and forgets the controller for `gvk`; returns false if none ran
    pub async fn remove(&self, gvk: &GroupVersionKind) -> bool {
        let Some(entry) = self.entries.write().await.remove(gvk) else {
            info!("No controller running for {}, nothing to remove", gvk_name(gvk));
            return false;
        };
        let _ = entry.shutdown.send(());
        info!("Stopped controller for {}", gvk_name(gvk));
        true
    }

    /// Owner and generation of the controller for `gvk`
    pub async fn registered(&self, gvk: &GroupVersionKind) -> Option<Registered> {
        self.entries.read().await.get(gvk).map(|e| e.registered.clone())
    }

    /// GVKs whose controllers belong to registration `owner`
    pub async fn find_by_owner(&self, owner: &str) -> Vec<GroupVersionKind> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.registered.owner == owner)
            .map(|(gvk, _)| gvk.clone())
            .collect()
    }

    /// Stops every controller owned by registration `owner`; returns their GVKs
    pub async fn remove_owned(&self, owner: &str) -> Vec<GroupVersionKind> {
        let owned = self.find_by_owner(owner).await;
        let mut removed = Vec::with_capacity(owned.len());
        for gvk in owned {
            if self.remove(&gvk).await {
                removed.push(gvk);
            }
        }
        removed
    }

    /// True if a controller runs for `gvk`
    pub async fn contains(&self, gvk: &GroupVersionKind) -> bool {
        self.entries.read().await.contains_key(gvk)
    }

    /// Number of running controllers
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True if no controller runs
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Signals every controller and waits up to `grace` for all of them
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ControllerError> {
        let entries: Vec<Entry> = self.entries.write().await.drain().map(|(_, e)| e).collect();
        if entries.is_empty() {
            return Ok(());
        }
        info!("Stopping {} controllers", entries.len());

        let handles: Vec<JoinHandle<()>> = entries
            .into_iter()
            .map(|entry| {
                let _ = entry.shutdown.send(());
                entry.handle
            })
            .collect();

        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results.into_iter().filter_map(Result::err) {
                    warn!("Controller task ended abnormally: {}", result);
                }
                Ok(())
            }
            Err(_) => {
                error!("Controllers did not stop within {:?}", grace);
                Err(ControllerError::Shutdown(format!(
                    "controllers still running after {grace:?}"
                )))
            }
        }
    }
}

/// `kind.version.group` for logs
pub fn gvk_name(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}.{}", gvk.kind, gvk.version)
    } else {
        format!("{}.{}.{}", gvk.kind, gvk.version, gvk.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::FormFactor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeLauncher {
        launches: AtomicUsize,
        stopped: Arc<AtomicUsize>,
        ignore_shutdown: bool,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ControllerLauncher for FakeLauncher {
        async fn launch(
            &self,
            _target: ControllerTarget,
            shutdown: oneshot::Receiver<()>,
        ) -> Result<JoinHandle<()>, ControllerError> {
            if self.fail {
                return Err(ControllerError::Watch("cannot watch".to_string()));
            }
            self.launches.fetch_add(1, Ordering::SeqCst);
            let stopped = self.stopped.clone();
            let ignore = self.ignore_shutdown;
            Ok(tokio::spawn(async move {
                if ignore {
                    std::future::pending::<()>().await;
                }
                let _ = shutdown.await;
                stopped.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    fn target(kind: &str, owner: &str) -> ControllerTarget {
        let gvk = GroupVersionKind::gvk("example.com", "v1", kind);
        ControllerTarget {
            owner: owner.to_string(),
            generation: Some(1),
            resource: ApiResource::from_gvk(&gvk),
            gvk,
            namespaced: true,
            capabilities: StatusCapabilities::all(),
            workload: Workload {
                form_factor: FormFactor::default(),
                image: "ghcr.io/example/dog:1.0".to_string(),
                port: None,
                parameter_configuration: Default::default(),
                status_configuration: Default::default(),
            },
            hook: None,
        }
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let launcher = Arc::new(FakeLauncher::default());
        let registry = ControllerRegistry::new(launcher.clone());

        assert!(registry.ensure(target("Dog", "dogs")).await.unwrap());
        assert!(!registry.ensure(target("Dog", "dogs")).await.unwrap());

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);
        let gvk = GroupVersionKind::gvk("example.com", "v1", "Dog");
        assert_eq!(
            registry.registered(&gvk).await,
            Some(Registered {
                owner: "dogs".to_string(),
                generation: Some(1),
            })
        );
    }

    #[tokio::test]
    async fn test_remove_unknown_gvk_is_a_no_op() {
        let registry = ControllerRegistry::new(Arc::new(FakeLauncher::default()));
        assert!(!registry.remove(&GroupVersionKind::gvk("example.com", "v1", "Cat")).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_stops_controller() {
        let launcher = Arc::new(FakeLauncher::default());
        let registry = ControllerRegistry::new(launcher.clone());
        registry.ensure(target("Dog", "dogs")).await.unwrap();

        let gvk = GroupVersionKind::gvk("example.com", "v1", "Dog");
        assert!(registry.remove(&gvk).await);
        assert!(!registry.contains(&gvk).await);

        // Re-ensuring after removal starts a fresh controller
        assert!(registry.ensure(target("Dog", "dogs")).await.unwrap());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_find_by_owner() {
        let registry = ControllerRegistry::new(Arc::new(FakeLauncher::default()));
        registry.ensure(target("Dog", "pets")).await.unwrap();
        registry.ensure(target("Cat", "pets")).await.unwrap();
        registry.ensure(target("Cow", "farm")).await.unwrap();

        let mut kinds: Vec<String> = registry
            .find_by_owner("pets")
            .await
            .into_iter()
            .map(|gvk| gvk.kind)
            .collect();
        kinds.sort();
        assert_eq!(kinds, vec!["Cat", "Dog"]);
    }

    #[tokio::test]
    async fn test_remove_owned_stops_only_that_owner() {
        let launcher = Arc::new(FakeLauncher::default());
        let registry = ControllerRegistry::new(launcher.clone());
        registry.ensure(target("Dog", "pets")).await.unwrap();
        registry.ensure(target("Cat", "pets")).await.unwrap();
        registry.ensure(target("Cow", "farm")).await.unwrap();

        let removed = registry.remove_owned("pets").await;
        assert_eq!(removed.len(), 2);
        assert!(registry.find_by_owner("pets").await.is_empty());
        assert!(registry.contains(&GroupVersionKind::gvk("example.com", "v1", "Cow")).await);
        assert!(registry.remove_owned("pets").await.is_empty());

        tokio::time::timeout(Duration::from_secs(5), async {
            while launcher.stopped.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_failed_launch_registers_nothing() {
        let launcher = Arc::new(FakeLauncher {
            fail: true,
            ..Default::default()
        });
        let registry = ControllerRegistry::new(launcher);
        assert!(registry.ensure(target("Dog", "dogs")).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_controllers() {
        let launcher = Arc::new(FakeLauncher::default());
        let registry = ControllerRegistry::new(launcher.clone());
        registry.ensure(target("Dog", "pets")).await.unwrap();
        registry.ensure(target("Cat", "pets")).await.unwrap();

        registry.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(launcher.stopped.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_after_grace() {
        let launcher = Arc::new(FakeLauncher {
            ignore_shutdown: true,
            ..Default::default()
        });
        let registry = ControllerRegistry::new(launcher);
        registry.ensure(target("Dog", "pets")).await.unwrap();

        let result = registry.shutdown(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ControllerError::Shutdown(_))));
    }
}
