//! Field rendering
//!
//! Turns an instance's `spec` into workload parameters (environment
//! variables) according to a [`ParameterConfiguration`], then projects
//! selected parameters into a status patch according to a
//! [`StatusConfiguration`].
//!
//! Rendering rules, in order of precedence for every path:
//!
//! 1. Paths below a field whose value was replaced by a rule are skipped.
//! 2. `skip` drops the path.
//! 3. Intermediate map nodes without a customization are skipped.
//! 4. The value is a literal default, a Secret/ConfigMap key reference, the
//!    result of a built-in function, or the field's own value rendered by type.

mod parsed;

pub use parsed::{ParsedField, ParsedSpec, SPEC_ROOT, SpecNode, SpecVisitor};


use crate::error::RenderError;
use crate::resolver::AddressResolver;
use crds::{
    BUILTIN_RESOLVE_ADDRESS, BuiltInFunction, ObjectReference, ParameterConfiguration, RenderRule,
    StatusConfiguration,
};
use k8s_openapi::api::core::v1::{ConfigMapKeySelector, EnvVar, EnvVarSource, SecretKeySelector};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Root segment of status projection paths
const STATUS_ROOT: &str = "status";

/// Pseudo-path prefix of hook-contributed parameters
pub const HOOK_PATH_PREFIX: &str = "$hook.";

/// Environment variables produced by one reconcile pass
///
/// Indexed by originating path (for cross references and status projection)
/// and by final name (for collision detection). A later insert under an
/// existing name replaces the earlier variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedParameters {
    by_path: BTreeMap<String, EnvVar>,
    by_name: BTreeMap<String, String>,
}

impl RenderedParameters {
    /// Inserts `env` for `path`; returns the path it displaced, if any
    pub fn insert(&mut self, path: impl Into<String>, env: EnvVar) -> Option<String> {
        let path = path.into();
        if let Some(old) = self.by_path.remove(&path) {
            if self.by_name.get(&old.name) == Some(&path) {
                self.by_name.remove(&old.name);
            }
        }

        let displaced = self.by_name.insert(env.name.clone(), path.clone());
        if let Some(previous) = &displaced {
            warn!("Parameter {} from {} replaces the one rendered from {}", env.name, path, previous);
            self.by_path.remove(previous);
        }
        self.by_path.insert(path, env);
        displaced
    }

    /// Inserts a hook-contributed variable under its `$hook.` pseudo-path
    pub fn insert_hook(&mut self, env: EnvVar) -> Option<String> {
        let path = format!("{HOOK_PATH_PREFIX}{}", env.name);
        self.insert(path, env)
    }

    /// Variable rendered from `path`
    pub fn get_by_path(&self, path: &str) -> Option<&EnvVar> {
        self.by_path.get(path)
    }

    /// Variable named `name`
    pub fn get_by_name(&self, name: &str) -> Option<&EnvVar> {
        self.by_name.get(name).and_then(|path| self.by_path.get(path))
    }

    /// All variables, ordered by originating path
    pub fn env_vars(&self) -> Vec<EnvVar> {
        self.by_path.values().cloned().collect()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// True if nothing was rendered
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Result of rendering one instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    /// Rendered environment variables
    pub parameters: RenderedParameters,
    /// Status fields projected from parameters (keys relative to `status`)
    pub status_patch: Map<String, Value>,
}

/// Renders instance specs for one registration
#[derive(Clone)]
pub struct FieldRenderer {
    parameters: ParameterConfiguration,
    status: StatusConfiguration,
    resolver: Arc<dyn AddressResolver>,
}

impl std::fmt::Debug for FieldRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRenderer")
            .field("parameters", &self.parameters)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl FieldRenderer {
    /// Creates a renderer for a registration's parameter and status configuration
    pub fn new(
        parameters: ParameterConfiguration,
        status: StatusConfiguration,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            parameters,
            status,
            resolver,
        }
    }

    /// Renders `spec` (absent spec renders nothing) for an instance in `namespace`
    pub async fn render(&self, spec: Option<&Value>, namespace: &str) -> Result<RenderOutput, RenderError> {
        let Some(spec) = spec.filter(|s| !s.is_null()) else {
            debug!("Instance has no spec, nothing to render");
            return Ok(RenderOutput::default());
        };

        let parsed = ParsedSpec::parse(spec);
        let parameters = self.render_parameters(&parsed, namespace).await?;
        let status_patch = project_status(&self.status, &parameters)?;
        Ok(RenderOutput {
            parameters,
            status_patch,
        })
    }

    async fn render_parameters(
        &self,
        parsed: &ParsedSpec,
        namespace: &str,
    ) -> Result<RenderedParameters, RenderError> {
        let mut rendered = RenderedParameters::default();
        let mut avoid: Vec<String> = Vec::new();

        for (path, field) in parsed.fields() {
            if avoid.iter().any(|prefix| is_descendant(path, prefix)) {
                continue;
            }

            let customization = self.parameters.customization(path);
            if customization.is_some_and(|c| c.skip) {
                debug!("Skipping {}", path);
                continue;
            }
            if field.intermediate_node && customization.is_none() {
                continue;
            }

            let rule = customization.and_then(|c| c.render.as_ref());
            let name = match rule.and_then(|r| r.name.as_deref()) {
                Some(name) => name.to_string(),
                None => format!(
                    "{}{}",
                    self.parameters.default_prefix.as_deref().unwrap_or_default(),
                    field.default_name()
                ),
            };

            let env = match rule.filter(|r| r.overrides_value()) {
                None => literal(name, default_value(&field.value)?),
                Some(rule) => {
                    // Descendants of a replaced value are never rendered
                    avoid.push(path.clone());
                    self.override_value(parsed, field, name, rule, namespace).await?
                }
            };

            rendered.insert(path.clone(), env);
        }

        Ok(rendered)
    }

    async fn override_value(
        &self,
        parsed: &ParsedSpec,
        field: &ParsedField,
        name: String,
        rule: &RenderRule,
        namespace: &str,
    ) -> Result<EnvVar, RenderError> {
        let path = field.path();
        if let Some(value) = &rule.default_value {
            return Ok(literal(name, value.clone()));
        }
        if let Some(paths) = &rule.value_from_config_map {
            let selector = ConfigMapKeySelector {
                name: referenced_string(parsed, &paths.name, &path)?,
                key: referenced_string(parsed, &paths.key, &path)?,
                optional: None,
            };
            return Ok(from_source(name, EnvVarSource {
                config_map_key_ref: Some(selector),
                ..Default::default()
            }));
        }
        if let Some(paths) = &rule.value_from_secret {
            let selector = SecretKeySelector {
                name: referenced_string(parsed, &paths.name, &path)?,
                key: referenced_string(parsed, &paths.key, &path)?,
                optional: None,
            };
            return Ok(from_source(name, EnvVarSource {
                secret_key_ref: Some(selector),
                ..Default::default()
            }));
        }
        self.built_in(field, name, rule.value_from_built_in_func.as_ref(), namespace)
            .await
    }

    async fn built_in(
        &self,
        field: &ParsedField,
        name: String,
        function: Option<&BuiltInFunction>,
        namespace: &str,
    ) -> Result<EnvVar, RenderError> {
        let path = field.path();
        let function_name = function.map(|f| f.name.as_str()).unwrap_or_default();
        if function_name != BUILTIN_RESOLVE_ADDRESS {
            return Err(RenderError::UnknownBuiltIn {
                name: function_name.to_string(),
                path,
            });
        }

        if let Some(uri) = field.value.get("uri") {
            let uri = uri.as_str().ok_or_else(|| RenderError::InvalidAddress {
                path: path.clone(),
                reason: "uri must be a string".to_string(),
            })?;
            return Ok(literal(name, uri.to_string()));
        }

        if let Some(reference) = field.value.get("ref") {
            let reference: ObjectReference =
                serde_json::from_value(reference.clone()).map_err(|e| RenderError::InvalidAddress {
                    path: path.clone(),
                    reason: format!("invalid ref: {e}"),
                })?;
            let url = self.resolver.resolve_reference(&reference, namespace).await?;
            return Ok(literal(name, url));
        }

        Err(RenderError::InvalidAddress {
            path,
            reason: "expected a uri or ref child".to_string(),
        })
    }
}

/// True if `path` lies strictly below `prefix` (segment-wise)
fn is_descendant(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.'))
}

fn literal(name: String, value: String) -> EnvVar {
    EnvVar {
        name,
        value: Some(value),
        ..Default::default()
    }
}

/// Default rendering by type
///
/// Primitive lists join with commas, lists containing objects and non-string
/// scalars serialize as JSON, strings pass through.
fn default_value(value: &Value) -> Result<String, RenderError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Array(items) if items.iter().any(Value::is_object) => Ok(serde_json::to_string(value)?),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => serde_json::to_string(other),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(parts.join(","))
        }
        other => Ok(serde_json::to_string(other)?),
    }
}

/// Reads a referenced sibling path as a string
fn referenced_string(parsed: &ParsedSpec, path: &str, needed_by: &str) -> Result<String, RenderError> {
    let field = parsed.lookup(path).ok_or_else(|| RenderError::MissingReference {
        path: path.to_string(),
        needed_by: needed_by.to_string(),
    })?;
    match &field.value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Err(RenderError::MissingReference {
            path: path.to_string(),
            needed_by: needed_by.to_string(),
        }),
        other => Ok(serde_json::to_string(other)?),
    }
}

fn from_source(name: String, source: EnvVarSource) -> EnvVar {
    EnvVar {
        name,
        value: None,
        value_from: Some(source),
    }
}

/// Projects rendered parameters into status fields
///
/// Every failing element is collected; the error lists all of them.
pub fn project_status(
    config: &StatusConfiguration,
    parameters: &RenderedParameters,
) -> Result<Map<String, Value>, RenderError> {
    let mut patch = Map::new();
    let mut failures = Vec::new();

    for element in &config.add_elements {
        let Some(source) = &element.value_from_parameter else {
            continue;
        };
        let value = match parameters.get_by_path(&source.path) {
            Some(EnvVar { value: Some(value), .. }) => value.clone(),
            Some(env) => {
                failures.push(format!("{}: parameter {} has no literal value", element.path, env.name));
                continue;
            }
            None => {
                failures.push(format!("{}: no parameter rendered from {}", element.path, source.path));
                continue;
            }
        };
        if let Err(reason) = set_path(&mut patch, &element.path, Value::String(value)) {
            failures.push(format!("{}: {}", element.path, reason));
        }
    }

    if failures.is_empty() {
        Ok(patch)
    } else {
        Err(RenderError::StatusProjection(failures))
    }
}

/// Writes `value` at a dot-notation path below `status`, creating maps on the way
fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), String> {
    let relative = path
        .strip_prefix(STATUS_ROOT)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(path);
    let segments: Vec<&str> = relative.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err("empty path segment".to_string());
    }

    let (last, parents) = segments.split_last().ok_or_else(|| "empty path".to_string())?;
    let mut current = root;
    for segment in parents {
        let entry = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry
            .as_object_mut()
            .ok_or_else(|| format!("{segment} is not an object"))?;
    }
    current.insert((*last).to_string(), value);
    Ok(())
}
