//! Main controller implementation.
//!
//! Wires the Kubernetes client, the address resolver, the controller
//! registry and the Registration watcher, then runs until the watcher exits
//! or the process is interrupted. On the way out every instance controller
//! is stopped within the configured grace period.

use crate::config::{CLUSTER_DOMAIN_KEY, OperatorConfig};
use crate::error::ControllerError;
use crate::registration::RegistrationReconciler;
use crate::registry::ControllerRegistry;
use crate::resolver::{ConfigReader, KubeResolver};
use crate::watcher::{KubeLauncher, watch_registrations};
use component_core::AddressResolver;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Generic component operator
pub struct Controller {
    registry: Arc<ControllerRegistry>,
    registration_watcher: JoinHandle<()>,
    config: OperatorConfig,
}

impl Controller {
    /// Connects to the cluster and starts the Registration watcher
    pub async fn new(mut config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing component operator");

        let client = Client::try_default().await?;

        if let Some((namespace, name)) = &config.config_map {
            let reader = ConfigReader::new(client.clone());
            match reader.read_config_map_key(namespace, name, CLUSTER_DOMAIN_KEY).await {
                Ok(Some(domain)) if !domain.trim().is_empty() => {
                    info!("Cluster domain {} from ConfigMap {}/{}", domain.trim(), namespace, name);
                    config.cluster_domain = domain.trim().to_string();
                }
                Ok(_) => info!(
                    "ConfigMap {}/{} has no {}, keeping cluster domain {}",
                    namespace, name, CLUSTER_DOMAIN_KEY, config.cluster_domain
                ),
                Err(e) => warn!(
                    "Failed to read ConfigMap {}/{} (keeping cluster domain {}): {}",
                    namespace, name, config.cluster_domain, e
                ),
            }
        }

        let resolver: Arc<dyn AddressResolver> =
            Arc::new(KubeResolver::new(client.clone(), config.cluster_domain.clone()));
        let launcher = Arc::new(KubeLauncher::new(client.clone(), config.clone(), resolver.clone()));
        let registry = Arc::new(ControllerRegistry::new(launcher));
        let reconciler = Arc::new(RegistrationReconciler::new(client.clone(), registry.clone(), resolver));

        let concurrency = config.concurrency;
        let registration_watcher = tokio::spawn(watch_registrations(client, reconciler, concurrency));

        Ok(Self {
            registry,
            registration_watcher,
            config,
        })
    }

    /// Runs until the Registration watcher exits or Ctrl-C, then stops all
    /// instance controllers
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Component operator running");

        let outcome = tokio::select! {
            result = &mut self.registration_watcher => match result {
                Ok(()) => Err(ControllerError::Watch("Registration watcher exited".to_string())),
                Err(e) => Err(ControllerError::Watch(format!("Registration watcher panicked: {e}"))),
            },
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
                }
                Ok(())
            }
        };
        self.registration_watcher.abort();

        if let Err(e) = self.registry.shutdown(self.config.shutdown_grace).await {
            error!("Shutdown did not complete cleanly: {}", e);
        }
        info!("Component operator stopped");
        outcome
    }
}
