//! CRD status capability introspection
//!
//! A target CRD may not declare every status sub-field the manager knows how
//! to maintain. The schema of the served version is inspected once per
//! registration; unsupported sub-fields turn the matching manager operations
//! into no-ops.

use crate::error::StatusError;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionVersion;
use serde_json::Value;

const PRESERVE_UNKNOWN: &str = "x-kubernetes-preserve-unknown-fields";

/// Condition fields that must all be declared for condition support
const CONDITION_FIELDS: [(&str, &str); 5] = [
    ("type", "string"),
    ("status", "string"),
    ("reason", "string"),
    ("message", "string"),
    ("lastTransitionTime", "string"),
];

/// Status sub-fields supported by a target CRD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCapabilities {
    /// `status.observedGeneration` (integer)
    pub observed_generation: bool,
    /// `status.annotations` (string map)
    pub annotations: bool,
    /// `status.address.url` (string)
    pub address: bool,
    /// `status.conditions` (array of full condition objects)
    pub conditions: bool,
}

impl StatusCapabilities {
    /// Every capability enabled
    pub fn all() -> Self {
        Self {
            observed_generation: true,
            annotations: true,
            address: true,
            conditions: true,
        }
    }

    /// Derives capabilities from a CRD version's `openAPIV3Schema`
    ///
    /// A version without a schema, or without a `status` property, supports
    /// nothing. A `status` that preserves unknown fields supports everything.
    pub fn from_crd_version(version: &CustomResourceDefinitionVersion) -> Result<Self, StatusError> {
        let Some(schema) = version.schema.as_ref().and_then(|s| s.open_api_v3_schema.as_ref()) else {
            return Ok(Self::default());
        };
        Ok(Self::from_schema(&serde_json::to_value(schema)?))
    }

    /// Derives capabilities from a JSON schema document rooted at the object
    pub fn from_schema(schema: &Value) -> Self {
        let Some(status) = property(schema, "status") else {
            return Self::default();
        };
        if status.get(PRESERVE_UNKNOWN).and_then(Value::as_bool) == Some(true) {
            return Self::all();
        }

        Self {
            observed_generation: property(status, "observedGeneration").is_some_and(|p| has_type(p, "integer")),
            annotations: property(status, "annotations").is_some_and(is_string_map),
            address: property(status, "address")
                .and_then(|a| property(a, "url"))
                .is_some_and(|u| has_type(u, "string")),
            conditions: property(status, "conditions").is_some_and(is_condition_array),
        }
    }
}

fn property<'a>(schema: &'a Value, name: &str) -> Option<&'a Value> {
    schema.get("properties").and_then(|p| p.get(name))
}

fn has_type(schema: &Value, expected: &str) -> bool {
    schema.get("type").and_then(Value::as_str) == Some(expected)
}

fn is_string_map(schema: &Value) -> bool {
    has_type(schema, "object")
        && schema
            .get("additionalProperties")
            .is_some_and(|additional| has_type(additional, "string"))
}

fn is_condition_array(schema: &Value) -> bool {
    if !has_type(schema, "array") {
        return false;
    }
    let Some(items) = schema.get("items") else {
        return false;
    };
    CONDITION_FIELDS
        .iter()
        .all(|(field, kind)| property(items, field).is_some_and(|p| has_type(p, kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_status() -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "object",
                    "properties": {
                        "observedGeneration": {"type": "integer", "format": "int64"},
                        "annotations": {"type": "object", "additionalProperties": {"type": "string"}},
                        "address": {"type": "object", "properties": {"url": {"type": "string"}}},
                        "conditions": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "type": {"type": "string"},
                                    "status": {"type": "string"},
                                    "reason": {"type": "string"},
                                    "message": {"type": "string"},
                                    "lastTransitionTime": {"type": "string", "format": "date-time"},
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_full_status_schema_supports_everything() {
        assert_eq!(StatusCapabilities::from_schema(&full_status()), StatusCapabilities::all());
    }

    #[test]
    fn test_missing_status_supports_nothing() {
        let schema = json!({"type": "object", "properties": {"spec": {"type": "object"}}});
        assert_eq!(StatusCapabilities::from_schema(&schema), StatusCapabilities::default());
    }

    #[test]
    fn test_preserve_unknown_fields_supports_everything() {
        let schema = json!({"properties": {"status": {"type": "object", "x-kubernetes-preserve-unknown-fields": true}}});
        assert_eq!(StatusCapabilities::from_schema(&schema), StatusCapabilities::all());
    }

    #[test]
    fn test_partial_condition_schema_is_unsupported() {
        let mut schema = full_status();
        schema["properties"]["status"]["properties"]["conditions"]["items"]["properties"]
            .as_object_mut()
            .unwrap()
            .remove("lastTransitionTime");
        schema["properties"]["status"]["properties"]["observedGeneration"]["type"] = json!("string");

        let caps = StatusCapabilities::from_schema(&schema);
        assert!(!caps.conditions);
        assert!(!caps.observed_generation);
        assert!(caps.annotations);
        assert!(caps.address);
    }

    #[test]
    fn test_crd_version_without_schema() {
        let version = CustomResourceDefinitionVersion {
            name: "v1".to_string(),
            served: true,
            storage: true,
            ..Default::default()
        };
        assert_eq!(
            StatusCapabilities::from_crd_version(&version).unwrap(),
            StatusCapabilities::default()
        );
    }
}
