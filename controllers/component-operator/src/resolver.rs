//! Cluster-backed address resolution and ConfigMap reads

use crate::error::ControllerError;
use component_core::{AddressResolver, ResolveError};
use crds::ObjectReference;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DynamicObject};
use kube::core::GroupVersionKind;
use kube::discovery::{Scope, pinned_kind};
use kube::Client;
use serde_json::Value;
use tracing::debug;

/// Resolves object references against the cluster
///
/// A core `Service` resolves to its cluster DNS name. Any other kind must be
/// addressable: `status.address.url`, else `status.url`.
#[derive(Clone)]
pub struct KubeResolver {
    client: Client,
    cluster_domain: String,
}

impl std::fmt::Debug for KubeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResolver")
            .field("cluster_domain", &self.cluster_domain)
            .finish_non_exhaustive()
    }
}

impl KubeResolver {
    /// Resolver using `cluster_domain` for Service addresses
    pub fn new(client: Client, cluster_domain: impl Into<String>) -> Self {
        Self {
            client,
            cluster_domain: cluster_domain.into(),
        }
    }
}

/// Address published in the status of an addressable object
pub fn status_address(object: &DynamicObject) -> Option<&str> {
    ["/status/address/url", "/status/url"]
        .iter()
        .find_map(|p| object.data.pointer(p).and_then(Value::as_str))
        .filter(|u| !u.is_empty())
}

#[async_trait::async_trait]
impl AddressResolver for KubeResolver {
    async fn resolve_reference(
        &self,
        reference: &ObjectReference,
        default_namespace: &str,
    ) -> Result<String, ResolveError> {
        let namespace = reference.namespace_or(default_namespace);
        let target = format!("{}/{} {}/{}", reference.api_version, reference.kind, namespace, reference.name);
        let (group, version) = reference.group_version();

        if group.is_empty() && reference.kind == "Service" {
            return Ok(format!(
                "http://{}.{}.svc.{}",
                reference.name, namespace, self.cluster_domain
            ));
        }

        let gvk = GroupVersionKind::gvk(group, version, &reference.kind);
        let (resource, capabilities) = pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| ResolveError::new(&target, format!("kind not served: {e}")))?;
        let api: Api<DynamicObject> = match capabilities.scope {
            Scope::Namespaced => Api::namespaced_with(self.client.clone(), namespace, &resource),
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };

        let object = api
            .get_opt(&reference.name)
            .await
            .map_err(|e| ResolveError::new(&target, e.to_string()))?
            .ok_or_else(|| ResolveError::new(&target, "not found"))?;
        let url = status_address(&object).ok_or_else(|| ResolveError::new(&target, "object is not addressable"))?;
        debug!("Resolved {} to {}", target, url);
        Ok(url.to_string())
    }
}

/// Reads single keys out of ConfigMaps
#[derive(Clone)]
pub struct ConfigReader {
    client: Client,
}

impl ConfigReader {
    /// Creates a reader
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Value of `key` in ConfigMap `namespace/name`; `None` if either is absent
    pub async fn read_config_map_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, ControllerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let Some(config_map) = api.get_opt(name).await? else {
            return Ok(None);
        };
        Ok(config_map.data.and_then(|mut data| data.remove(key)))
    }
}
