//! Parameter and status projection configuration
//!
//! Declares how fields of an instance's `spec` become workload parameters
//! (environment variables) and how rendered parameters are projected back
//! into the instance's `status`.

use k8s_openapi::api::core::v1::EnvVar;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the only built-in function currently supported
pub const BUILTIN_RESOLVE_ADDRESS: &str = "resolveAddress";

/// How an instance spec is turned into workload parameters
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParameterConfiguration {
    /// Prefix prepended to generated parameter names that are not explicitly renamed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_prefix: Option<String>,

    /// Static environment variables added to every workload
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_envs: Vec<EnvVar>,

    /// Per-path customizations of the default rendering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spec_customizations: Vec<SpecCustomization>,
}

impl ParameterConfiguration {
    /// Looks up the customization for a dot-notation path (e.g. `spec.a.b`)
    pub fn customization(&self, path: &str) -> Option<&SpecCustomization> {
        self.spec_customizations.iter().find(|c| c.path == path)
    }
}

/// Customization rule for one path of the instance spec
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SpecCustomization {
    /// Dot-notation path into the instance, rooted at `spec` (e.g. `spec.database.password`)
    pub path: String,

    /// Do not render this path at all
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip: bool,

    /// Rendering overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderRule>,
}

/// Overrides applied when rendering a single path
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RenderRule {
    /// Explicit parameter name (disables the default prefix)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Literal value used instead of the field's value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    /// Render as a ConfigMap key reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from_config_map: Option<KeySelectorPaths>,

    /// Render as a Secret key reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from_secret: Option<KeySelectorPaths>,

    /// Render through a built-in function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from_built_in_func: Option<BuiltInFunction>,
}

impl RenderRule {
    /// True if the rule replaces the field's own value
    pub fn overrides_value(&self) -> bool {
        self.default_value.is_some()
            || self.value_from_config_map.is_some()
            || self.value_from_secret.is_some()
            || self.value_from_built_in_func.is_some()
    }
}

/// Paths (into the instance) holding the object name and key of a key selector
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KeySelectorPaths {
    /// Path whose value is the Secret/ConfigMap name
    pub name: String,

    /// Path whose value is the key within the Secret/ConfigMap
    pub key: String,
}

/// Reference to a built-in rendering function
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BuiltInFunction {
    /// Function name; only `resolveAddress` is supported
    pub name: String,

    /// Function arguments (unused by `resolveAddress`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// How instance status is assembled
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusConfiguration {
    /// Type of the aggregate condition (defaults to "Ready")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub happy_condition: Option<String>,

    /// Additional condition types tracked on every instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,

    /// Status fields populated from rendered parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_elements: Vec<StatusElement>,
}

impl StatusConfiguration {
    /// Happy condition type, falling back to the default
    pub fn happy_condition_type(&self) -> &str {
        self.happy_condition
            .as_deref()
            .unwrap_or(crate::conditions::DEFAULT_HAPPY_CONDITION)
    }
}

/// A status field written from a rendered parameter
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusElement {
    /// Dot-notation path under `status` (e.g. `status.endpoint`)
    pub path: String,

    /// Source parameter, identified by its spec path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from_parameter: Option<ValueFromParameter>,
}

/// Selects a rendered parameter by the field path it originated from
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValueFromParameter {
    /// Spec path (e.g. `spec.endpoint`)
    pub path: String,
}
