//! Address resolution seam
//!
//! The renderer's `resolveAddress` built-in and the registration reconciler's
//! hook lookup both need to turn an object reference into a callable URL.
//! The operator provides a cluster-backed implementation; tests provide
//! static ones.

use crate::error::ResolveError;
use crds::{Destination, ObjectReference};

/// Resolves references and destinations to URLs
#[async_trait::async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolves an object reference; a missing namespace defaults to `default_namespace`
    async fn resolve_reference(
        &self,
        reference: &ObjectReference,
        default_namespace: &str,
    ) -> Result<String, ResolveError>;

    /// Resolves a destination
    ///
    /// An absolute `uri` wins. With a `ref`, a relative `uri` is appended to
    /// the referenced object's address.
    async fn resolve_destination(
        &self,
        destination: &Destination,
        default_namespace: &str,
    ) -> Result<String, ResolveError> {
        let uri = destination.uri.as_deref().filter(|u| !u.is_empty());
        match (&destination.reference, uri) {
            (_, Some(uri)) if uri.contains("://") => Ok(uri.to_string()),
            (Some(reference), uri) => {
                let base = self.resolve_reference(reference, default_namespace).await?;
                Ok(match uri {
                    Some(path) => join_url(&base, path),
                    None => base,
                })
            }
            (None, Some(uri)) => Err(ResolveError::new(uri, "relative URI without a ref")),
            (None, None) => Err(ResolveError::new("destination", "neither ref nor uri is set")),
        }
    }
}

/// Joins a relative path onto a base URL with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver;

    #[async_trait::async_trait]
    impl AddressResolver for FixedResolver {
        async fn resolve_reference(
            &self,
            reference: &ObjectReference,
            default_namespace: &str,
        ) -> Result<String, ResolveError> {
            Ok(format!(
                "http://{}.{}.svc.cluster.local",
                reference.name,
                reference.namespace_or(default_namespace)
            ))
        }
    }

    #[tokio::test]
    async fn test_absolute_uri_wins() {
        let dest = Destination {
            reference: Some(ObjectReference::new("v1", "Service", "hook")),
            uri: Some("https://elsewhere/hook".to_string()),
        };
        let url = FixedResolver.resolve_destination(&dest, "default").await.unwrap();
        assert_eq!(url, "https://elsewhere/hook");
    }

    #[tokio::test]
    async fn test_relative_uri_joins_ref_address() {
        let dest = Destination {
            reference: Some(ObjectReference::new("v1", "Service", "hook")),
            uri: Some("/v1/reconcile".to_string()),
        };
        let url = FixedResolver.resolve_destination(&dest, "ops").await.unwrap();
        assert_eq!(url, "http://hook.ops.svc.cluster.local/v1/reconcile");
    }

    #[tokio::test]
    async fn test_empty_destination_is_an_error() {
        let err = FixedResolver
            .resolve_destination(&Destination::default(), "default")
            .await
            .unwrap_err();
        assert!(err.reason.contains("neither"));
    }
}
