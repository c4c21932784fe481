//! Generic Component Operator
//!
//! Watches `Registration` objects and, for each registered CRD, runs an
//! instance controller that renders instances into a Deployment (plus
//! optional Service) or a Knative Service, calls the optional lifecycle hook
//! and maintains the instance status conditions.

mod backoff;
mod config;
mod controller;
mod error;
mod form_factor;
mod reconciler;
mod registration;
mod registry;
mod resolver;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube and reqwest both pull in rustls; pick the provider explicitly
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting component operator");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Cluster domain: {}", config.cluster_domain);
    info!("  Hook timeout: {:?}", config.hook_timeout);
    info!("  Concurrency: {}", config.concurrency);
    info!("  Field manager: {}", config.field_manager);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
