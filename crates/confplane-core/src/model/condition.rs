use serde::{Deserialize, Serialize};

use super::value::Value;

/// A single condition in an override's (implicitly AND-combined) condition
/// list. Recursive `and`/`or`/`not` variants box their children so the tree
/// can nest arbitrarily, mirroring the source's recursive sum type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Equals { property: String, value: Value },
    In { property: String, value: Value },
    NotIn { property: String, value: Value },
    LessThan { property: String, value: Value },
    LessThanOrEqual { property: String, value: Value },
    GreaterThan { property: String, value: Value },
    GreaterThanOrEqual { property: String, value: Value },
    Segmentation { property: String, percentage: f64, salt: String },
    And { conditions: Vec<Condition> },
    Or { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

/// A condition whose `Value` leaves have been resolved to concrete JSON (or
/// `None`/"undefined" when the reference could not be resolved). Shape
/// mirrors `Condition` with `value: Option<serde_json::Value>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RenderedCondition {
    Equals { property: String, value: Option<serde_json::Value> },
    In { property: String, value: Option<serde_json::Value> },
    NotIn { property: String, value: Option<serde_json::Value> },
    LessThan { property: String, value: Option<serde_json::Value> },
    LessThanOrEqual { property: String, value: Option<serde_json::Value> },
    GreaterThan { property: String, value: Option<serde_json::Value> },
    GreaterThanOrEqual { property: String, value: Option<serde_json::Value> },
    Segmentation { property: String, percentage: f64, salt: String },
    And { conditions: Vec<RenderedCondition> },
    Or { conditions: Vec<RenderedCondition> },
    Not { condition: Box<RenderedCondition> },
}
