//! Kubernetes object references and addressable destinations
//!
//! Provides the reference shapes used by registrations and by instance specs:
//! a typed `ObjectReference` (apiVersion, kind, name, optional namespace) and a
//! `Destination` that points at something callable either through a reference,
//! a literal URI, or both (URI relative to the reference).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kubernetes-style reference to a single object
///
/// Mirrors the `apiVersion`/`kind`/`name`/`namespace` quadruple found in
/// `corev1.ObjectReference`. The namespace defaults to the namespace of the
/// referencing object when omitted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referenced object (e.g., "v1", "serving.knative.dev/v1")
    pub api_version: String,

    /// Kind of the referenced object (e.g., "Service")
    pub kind: String,

    /// Name of the referenced object
    pub name: String,

    /// Namespace of the referenced object (defaults to the referencing object's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectReference {
    /// Create a new reference in the same namespace as the referencing object
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a new reference with an explicit namespace
    pub fn with_namespace(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::new(api_version, kind, name)
        }
    }

    /// Splits `apiVersion` into `(group, version)`; the core group is `""`.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }

    /// Namespace of the reference, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }
}

/// An addressable destination
///
/// At least one of `ref` or `uri` must be set. When both are set the URI is
/// resolved relative to the address of the referenced object.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Reference to an addressable object
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ObjectReference>,

    /// Absolute URI, or a path relative to the referenced object's address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Destination {
    /// Destination pointing at a literal URI
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            reference: None,
            uri: Some(uri.into()),
        }
    }

    /// Destination pointing at an object reference
    pub fn from_reference(reference: ObjectReference) -> Self {
        Self {
            reference: Some(reference),
            uri: None,
        }
    }

    /// True if neither a reference nor a URI is configured
    pub fn is_empty(&self) -> bool {
        self.reference.is_none() && self.uri.as_deref().is_none_or(str::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_version_core_and_named_groups() {
        let core = ObjectReference::new("v1", "Service", "svc");
        assert_eq!(core.group_version(), ("", "v1"));

        let knative = ObjectReference::new("serving.knative.dev/v1", "Service", "svc");
        assert_eq!(knative.group_version(), ("serving.knative.dev", "v1"));
    }

    #[test]
    fn test_destination_ref_field_is_named_ref() {
        let dest = Destination::from_reference(ObjectReference::new("v1", "Service", "hook"));
        let json = serde_json::to_value(&dest).unwrap();
        assert_eq!(json["ref"]["name"], "hook");
        assert!(json.get("uri").is_none());
    }

    #[test]
    fn test_destination_is_empty() {
        assert!(Destination::default().is_empty());
        assert!(Destination::from_uri("").is_empty());
        assert!(!Destination::from_uri("http://hook").is_empty());
    }
}
