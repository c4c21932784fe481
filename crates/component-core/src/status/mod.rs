//! Instance status management
//!
//! A [`StatusManager`] wraps one instance's status document for the duration
//! of a reconcile pass. It keeps the condition list equal to the registered
//! [`ConditionSet`] and recomputes the happy condition after every change.
//! Operations on sub-fields the target CRD does not declare are no-ops.
//!
//! Managers are created per reconcile by a [`StatusManagerFactory`] and are
//! never shared, so mutation goes through `&mut self` without locking.

pub mod capabilities;

use crate::error::StatusError;
use capabilities::StatusCapabilities;
use chrono::{DateTime, SubsecRound, Utc};
use crds::{Condition, ConditionStatus, REASON_CONDITIONS_NOT_OK, REASON_CONDITIONS_OK};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

const CONDITIONS: &str = "conditions";
const ANNOTATIONS: &str = "annotations";
const OBSERVED_GENERATION: &str = "observedGeneration";
const ADDRESS: &str = "address";
const URL: &str = "url";

/// Condition types registered for a target kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionSet {
    happy: String,
    dependents: BTreeSet<String>,
}

impl ConditionSet {
    /// Builds a set from the happy type and the types it summarizes
    pub fn new<I, S>(happy: impl Into<String>, dependents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let happy = happy.into();
        let dependents = dependents
            .into_iter()
            .map(Into::<String>::into)
            .filter(|t| *t != happy)
            .collect();
        Self { happy, dependents }
    }

    /// The aggregate condition type
    pub fn happy(&self) -> &str {
        &self.happy
    }

    /// Types summarized by the happy condition, sorted
    pub fn dependents(&self) -> impl Iterator<Item = &str> {
        self.dependents.iter().map(String::as_str)
    }

    /// True if `type_` is registered
    pub fn contains(&self, type_: &str) -> bool {
        type_ == self.happy || self.dependents.contains(type_)
    }

    /// All registered types, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.dependents().chain(std::iter::once(self.happy.as_str())).collect();
        types.sort_unstable();
        types
    }
}

/// Creates status managers for one target kind
#[derive(Debug, Clone)]
pub struct StatusManagerFactory {
    capabilities: StatusCapabilities,
    conditions: ConditionSet,
}

impl StatusManagerFactory {
    /// Creates a factory for the given capabilities and condition set
    pub fn new(capabilities: StatusCapabilities, conditions: ConditionSet) -> Self {
        Self {
            capabilities,
            conditions,
        }
    }

    /// Capabilities of the target kind
    pub fn capabilities(&self) -> StatusCapabilities {
        self.capabilities
    }

    /// Registered condition types
    pub fn conditions(&self) -> &ConditionSet {
        &self.conditions
    }

    /// Wraps a status document (absent is treated as empty) and sanitizes it
    pub fn for_status(&self, status: Option<&Value>) -> Result<StatusManager, StatusError> {
        self.for_status_at(status, Utc::now())
    }

    /// Like [`Self::for_status`] with an explicit clock
    pub fn for_status_at(&self, status: Option<&Value>, now: DateTime<Utc>) -> Result<StatusManager, StatusError> {
        let mut document = match status {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => return Err(StatusError::NotAnObject(type_name(other).to_string())),
        };

        let conditions = if self.capabilities.conditions {
            parse_conditions(document.remove(CONDITIONS))
        } else {
            Vec::new()
        };

        let mut manager = StatusManager {
            document,
            conditions,
            capabilities: self.capabilities,
            condition_set: self.conditions.clone(),
            now: now.trunc_subsecs(0),
        };
        manager.sanitize_conditions();
        Ok(manager)
    }
}

/// Owns one instance's status document during a reconcile pass
#[derive(Debug, Clone)]
pub struct StatusManager {
    /// Status fields other than conditions
    document: Map<String, Value>,
    /// Parsed conditions, kept sorted by type
    conditions: Vec<Condition>,
    capabilities: StatusCapabilities,
    condition_set: ConditionSet,
    /// Shared transition timestamp for this pass
    now: DateTime<Utc>,
}

impl StatusManager {
    /// Restricts conditions to the registered set, defaults missing ones to
    /// Unknown and sorts by type
    ///
    /// Idempotent. Recomputes the happy condition.
    pub fn sanitize_conditions(&mut self) {
        if !self.capabilities.conditions {
            return;
        }

        let set = &self.condition_set;
        self.conditions.retain(|c| set.contains(&c.type_));
        let mut seen = BTreeSet::new();
        self.conditions.retain(|c| seen.insert(c.type_.clone()));

        for type_ in set.types() {
            if !seen.contains(type_) {
                let mut condition = Condition::unknown(type_);
                condition.last_transition_time = Some(self.now);
                self.conditions.push(condition);
            }
        }
        self.conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
        self.update_happiness();
    }

    /// Sets a registered condition and recomputes happiness
    ///
    /// The transition time moves only when the status changes. Unregistered
    /// types and the happy type itself are ignored.
    pub fn set_condition(&mut self, condition: Condition) {
        if !self.capabilities.conditions {
            return;
        }
        if !self.condition_set.contains(&condition.type_) {
            debug!("Ignoring unregistered condition {}", condition.type_);
            return;
        }
        if condition.type_ == self.condition_set.happy() {
            debug!("Ignoring direct update of happy condition {}", condition.type_);
            return;
        }

        self.sanitize_conditions();
        self.put(condition);
        self.update_happiness();
    }

    /// Registered condition of the given type
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// All conditions, sorted by type
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// The happy condition
    pub fn happy_condition(&self) -> Option<&Condition> {
        self.get_condition(self.condition_set.happy())
    }

    /// True if the happy condition is True
    pub fn is_happy(&self) -> bool {
        self.happy_condition().is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Records the instance generation this pass acted on
    pub fn set_observed_generation(&mut self, generation: i64) {
        if self.capabilities.observed_generation {
            self.document.insert(OBSERVED_GENERATION.to_string(), Value::from(generation));
        }
    }

    /// `status.observedGeneration`, if supported and set
    pub fn get_observed_generation(&self) -> Option<i64> {
        if !self.capabilities.observed_generation {
            return None;
        }
        self.document.get(OBSERVED_GENERATION).and_then(Value::as_i64)
    }

    /// Sets `status.address.url`
    pub fn set_address_url(&mut self, url: &str) {
        if !self.capabilities.address {
            return;
        }
        let address = self
            .document
            .entry(ADDRESS.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !address.is_object() {
            warn!("Replacing non-object status.address");
            *address = Value::Object(Map::new());
        }
        if let Some(address) = address.as_object_mut() {
            address.insert(URL.to_string(), Value::String(url.to_string()));
        }
    }

    /// `status.address.url`, if supported and set
    pub fn get_address_url(&self) -> Option<&str> {
        if !self.capabilities.address {
            return None;
        }
        self.document.get(ADDRESS)?.get(URL)?.as_str()
    }

    /// Sets one status annotation
    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if !self.capabilities.annotations {
            return;
        }
        let annotations = self
            .document
            .entry(ANNOTATIONS.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !annotations.is_object() {
            warn!("Replacing non-object status.annotations");
            *annotations = Value::Object(Map::new());
        }
        if let Some(annotations) = annotations.as_object_mut() {
            annotations.insert(key.into(), Value::String(value.into()));
        }
    }

    /// One status annotation, if supported and set
    pub fn get_annotation(&self, key: &str) -> Option<&str> {
        if !self.capabilities.annotations {
            return None;
        }
        self.document.get(ANNOTATIONS)?.get(key)?.as_str()
    }

    /// Applies an external status document
    ///
    /// Conditions go through [`Self::set_condition`], annotations merge key by
    /// key, every other top-level key overwrites the current value.
    pub fn merge(&mut self, patch: &Map<String, Value>) -> Result<(), StatusError> {
        for (key, value) in patch {
            match key.as_str() {
                CONDITIONS => {
                    let conditions: Vec<Condition> =
                        serde_json::from_value(value.clone()).map_err(|e| StatusError::InvalidField {
                            field: CONDITIONS.to_string(),
                            reason: e.to_string(),
                        })?;
                    for condition in conditions {
                        self.set_condition(condition);
                    }
                }
                ANNOTATIONS => {
                    let annotations = value.as_object().ok_or_else(|| StatusError::InvalidField {
                        field: ANNOTATIONS.to_string(),
                        reason: format!("expected an object, got {}", type_name(value)),
                    })?;
                    for (k, v) in annotations {
                        match v.as_str() {
                            Some(v) => self.set_annotation(k.clone(), v),
                            None => warn!("Skipping non-string status annotation {}", k),
                        }
                    }
                }
                _ => {
                    self.document.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    /// The current status document
    pub fn status(&self) -> Result<Value, StatusError> {
        let mut document = self.document.clone();
        if self.capabilities.conditions {
            document.insert(CONDITIONS.to_string(), serde_json::to_value(&self.conditions)?);
        }
        Ok(Value::Object(document))
    }

    /// Inserts or replaces a condition, keeping order
    fn put(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time.or(Some(self.now))
                } else {
                    Some(self.now)
                };
                *existing = condition;
            }
            None => {
                condition.last_transition_time = Some(self.now);
                self.conditions.push(condition);
                self.conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
            }
        }
    }

    /// Recomputes the happy condition from every other condition
    ///
    /// Any False gives False. Otherwise any Unknown gives False as well; the
    /// happy condition only reports True or False.
    fn update_happiness(&mut self) {
        let happy = self.condition_set.happy().to_string();
        let mut aggregate = ConditionStatus::True;
        for condition in self.conditions.iter().filter(|c| c.type_ != happy) {
            match condition.status {
                ConditionStatus::False => {
                    aggregate = ConditionStatus::False;
                    break;
                }
                ConditionStatus::Unknown => aggregate = ConditionStatus::Unknown,
                ConditionStatus::True => {}
            }
        }

        let condition = if aggregate == ConditionStatus::True {
            Condition::ok(happy, REASON_CONDITIONS_OK)
        } else {
            Condition::failed(happy, REASON_CONDITIONS_NOT_OK, "")
        };
        self.put(condition);
    }
}

/// Parses a raw conditions value, dropping entries that do not parse
fn parse_conditions(raw: Option<Value>) -> Vec<Condition> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Condition>(item) {
            Ok(condition) => Some(condition),
            Err(e) => {
                warn!("Dropping malformed condition: {}", e);
                None
            }
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
