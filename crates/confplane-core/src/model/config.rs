use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::condition::{Condition, RenderedCondition};
use super::value::Value;

/// A named rule: replaces the base value when all of `conditions` match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub value: Value,
}

/// An `Override` whose `reference` values have been resolved to concrete
/// JSON against the replica (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedOverride {
    pub name: String,
    pub conditions: Vec<RenderedCondition>,
    /// `None` when the override's own value was an unresolvable reference.
    pub value: Option<serde_json::Value>,
}

/// Authored configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Unique per project, `[A-Za-z0-9_-]{1,100}`.
    pub name: String,
    /// Monotonic per `id`; advanced on any change to this row or a variant.
    pub version: i64,
    pub base_value: serde_json::Value,
    pub base_schema: Option<serde_json::Value>,
    pub base_overrides: Vec<Override>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A per-environment overlay of a config's `value`/`schema`/`overrides`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigVariant {
    pub id: Uuid,
    pub config_id: Uuid,
    pub environment_id: Uuid,
    pub value: serde_json::Value,
    pub schema: Option<serde_json::Value>,
    pub overrides: Vec<Override>,
    pub use_base_schema: bool,
    pub created_at: DateTime<Utc>,
}

/// The resolution of a config for one environment: the variant's
/// `value`/`overrides` if a variant exists for that environment, otherwise
/// the config's base value/overrides (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentalConfig {
    pub project_id: Uuid,
    pub name: String,
    pub environment_id: Uuid,
    pub version: i64,
    pub value: serde_json::Value,
    pub schema: Option<serde_json::Value>,
    pub overrides: Vec<Override>,
}

/// The replica's in-memory projection of one `Config` row plus its variants,
/// keyed by `environment_id` (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigReplica {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub version: i64,
    pub base_value: serde_json::Value,
    pub base_schema: Option<serde_json::Value>,
    pub base_overrides: Vec<Override>,
    pub variants: HashMap<Uuid, ConfigVariant>,
}

impl ConfigReplica {
    pub fn environmental_config(&self, environment_id: Uuid) -> EnvironmentalConfig {
        match self.variants.get(&environment_id) {
            Some(variant) => EnvironmentalConfig {
                project_id: self.project_id,
                name: self.name.clone(),
                environment_id,
                version: self.version,
                value: variant.value.clone(),
                schema: if variant.use_base_schema {
                    self.base_schema.clone()
                } else {
                    variant.schema.clone()
                },
                overrides: variant.overrides.clone(),
            },
            None => EnvironmentalConfig {
                project_id: self.project_id,
                name: self.name.clone(),
                environment_id,
                version: self.version,
                value: self.base_value.clone(),
                schema: self.base_schema.clone(),
                overrides: self.base_overrides.clone(),
            },
        }
    }

    /// The raw stored value for `environment_id` *without* overrides applied
    /// — what the reference resolver reads (spec.md §4.6).
    pub fn config_value(&self, environment_id: Uuid) -> serde_json::Value {
        match self.variants.get(&environment_id) {
            Some(variant) => variant.value.clone(),
            None => self.base_value.clone(),
        }
    }

    /// `(project_id, config_name)` pairs referenced by any override in this
    /// config, across base and every variant — used to maintain the
    /// `referencedBy` index (spec.md §4.7).
    pub fn referenced_configs(&self) -> Vec<(Uuid, String)> {
        let mut out = Vec::new();
        collect_references(&self.base_overrides, &mut out);
        for variant in self.variants.values() {
            collect_references(&variant.overrides, &mut out);
        }
        out
    }
}

fn collect_references(overrides: &[Override], out: &mut Vec<(Uuid, String)>) {
    for o in overrides {
        collect_value_reference(&o.value, out);
        for c in &o.conditions {
            collect_condition_references(c, out);
        }
    }
}

fn collect_value_reference(value: &Value, out: &mut Vec<(Uuid, String)>) {
    if let Value::Reference { project_id, config_name, .. } = value {
        out.push((*project_id, config_name.clone()));
    }
}

fn collect_condition_references(condition: &Condition, out: &mut Vec<(Uuid, String)>) {
    use Condition::*;
    match condition {
        Equals { value, .. }
        | In { value, .. }
        | NotIn { value, .. }
        | LessThan { value, .. }
        | LessThanOrEqual { value, .. }
        | GreaterThan { value, .. }
        | GreaterThanOrEqual { value, .. } => collect_value_reference(value, out),
        Segmentation { .. } => {}
        And { conditions } | Or { conditions } => {
            for c in conditions {
                collect_condition_references(c, out);
            }
        }
        Not { condition } => collect_condition_references(condition, out),
    }
}
