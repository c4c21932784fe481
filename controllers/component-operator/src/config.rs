//! Operator configuration
//!
//! Read once from environment variables in `main` and passed by value into
//! the components that need it.

use crate::error::ControllerError;
use std::time::Duration;

/// Default cluster domain used for Service addresses
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Default server-side apply field manager
pub const DEFAULT_FIELD_MANAGER: &str = "component-operator";

/// ConfigMap key overriding the cluster domain
pub const CLUSTER_DOMAIN_KEY: &str = "cluster-domain";

/// Operator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Restrict instance watches to one namespace
    pub watch_namespace: Option<String>,
    /// Domain used when resolving Service addresses
    pub cluster_domain: String,
    /// `(namespace, name)` of a ConfigMap overriding the cluster domain
    pub config_map: Option<(String, String)>,
    /// Default hook call timeout
    pub hook_timeout: Duration,
    /// Bounded wait for controller loops on shutdown
    pub shutdown_grace: Duration,
    /// Per-CRD reconcile concurrency
    pub concurrency: u16,
    /// Server-side apply field manager
    pub field_manager: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            config_map: None,
            hook_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
            concurrency: 3,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config_map = match get("OPERATOR_CONFIG_MAP") {
            Some(value) => {
                let (namespace, name) = value.split_once('/').ok_or_else(|| {
                    ControllerError::InvalidConfig(format!(
                        "OPERATOR_CONFIG_MAP must be namespace/name, got {value}"
                    ))
                })?;
                Some((namespace.to_string(), name.to_string()))
            }
            None => None,
        };

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            cluster_domain: get("CLUSTER_DOMAIN").unwrap_or(defaults.cluster_domain),
            config_map,
            hook_timeout: parse_seconds("HOOK_TIMEOUT_SECONDS", get("HOOK_TIMEOUT_SECONDS"))?
                .unwrap_or(defaults.hook_timeout),
            shutdown_grace: parse_seconds("SHUTDOWN_GRACE_SECONDS", get("SHUTDOWN_GRACE_SECONDS"))?
                .unwrap_or(defaults.shutdown_grace),
            concurrency: match get("RECONCILE_CONCURRENCY") {
                Some(value) => value
                    .trim()
                    .parse::<u16>()
                    .ok()
                    .filter(|c| *c > 0)
                    .ok_or_else(|| {
                        ControllerError::InvalidConfig(format!(
                            "RECONCILE_CONCURRENCY must be a positive integer, got {value}"
                        ))
                    })?,
                None => defaults.concurrency,
            },
            field_manager: get("FIELD_MANAGER").unwrap_or(defaults.field_manager),
        })
    }
}

fn parse_seconds(key: &str, value: Option<String>) -> Result<Option<Duration>, ControllerError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| {
                    ControllerError::InvalidConfig(format!("{key} must be a number of seconds, got {v}: {e}"))
                })
        })
        .transpose()
}
