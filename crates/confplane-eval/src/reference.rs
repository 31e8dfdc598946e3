//! Reference rendering (spec.md §4.6).
//!
//! `render_overrides` walks each override's condition and value trees and
//! replaces every `Value::Reference` with the concrete JSON at that path of
//! the *stored, base-less* value of the referenced config's chosen variant.
//! This deliberately reads raw stored values rather than re-evaluating them
//! — it cannot recurse into another config's overrides — which is what
//! makes cycles impossible to form and keeps rendering non-suspending.

use uuid::Uuid;

use confplane_core::model::{
    resolve_path, Condition, Override, RenderedCondition, RenderedOverride, Value,
};

/// The one collaborator this crate depends on: "give me the raw stored
/// value of `configName` in `projectId`/`environmentId`, with no overrides
/// applied". Implemented by `confplane-replica::store::ReplicaStore`.
pub trait ConfigValueResolver {
    fn resolve_config_value(
        &self,
        project_id: Uuid,
        config_name: &str,
        environment_id: Uuid,
    ) -> Option<serde_json::Value>;
}

/// Renders every override in `overrides` for environment `environment_id`,
/// given `resolver`. Rendering is done once per call; it is not memoized
/// across calls — a second read after a config change always re-resolves.
pub fn render_overrides(
    overrides: &[Override],
    environment_id: Uuid,
    resolver: &dyn ConfigValueResolver,
) -> Vec<RenderedOverride> {
    overrides
        .iter()
        .map(|o| render_override(o, environment_id, resolver))
        .collect()
}

fn render_override(
    o: &Override,
    environment_id: Uuid,
    resolver: &dyn ConfigValueResolver,
) -> RenderedOverride {
    RenderedOverride {
        name: o.name.clone(),
        conditions: o
            .conditions
            .iter()
            .map(|c| render_condition(c, environment_id, resolver))
            .collect(),
        value: render_value(&o.value, environment_id, resolver),
    }
}

fn render_value(
    value: &Value,
    environment_id: Uuid,
    resolver: &dyn ConfigValueResolver,
) -> Option<serde_json::Value> {
    match value {
        Value::Literal { value } => Some(value.clone()),
        Value::Reference {
            project_id,
            config_name,
            path,
        } => {
            let stored = resolver.resolve_config_value(*project_id, config_name, environment_id)?;
            resolve_path(&stored, path)
        }
    }
}

fn render_condition(
    condition: &Condition,
    environment_id: Uuid,
    resolver: &dyn ConfigValueResolver,
) -> RenderedCondition {
    use Condition::*;
    match condition {
        Equals { property, value } => RenderedCondition::Equals {
            property: property.clone(),
            value: render_value(value, environment_id, resolver),
        },
        In { property, value } => RenderedCondition::In {
            property: property.clone(),
            value: render_value(value, environment_id, resolver),
        },
        NotIn { property, value } => RenderedCondition::NotIn {
            property: property.clone(),
            value: render_value(value, environment_id, resolver),
        },
        LessThan { property, value } => RenderedCondition::LessThan {
            property: property.clone(),
            value: render_value(value, environment_id, resolver),
        },
        LessThanOrEqual { property, value } => RenderedCondition::LessThanOrEqual {
            property: property.clone(),
            value: render_value(value, environment_id, resolver),
        },
        GreaterThan { property, value } => RenderedCondition::GreaterThan {
            property: property.clone(),
            value: render_value(value, environment_id, resolver),
        },
        GreaterThanOrEqual { property, value } => RenderedCondition::GreaterThanOrEqual {
            property: property.clone(),
            value: render_value(value, environment_id, resolver),
        },
        Segmentation {
            property,
            percentage,
            salt,
        } => RenderedCondition::Segmentation {
            property: property.clone(),
            percentage: *percentage,
            salt: salt.clone(),
        },
        And { conditions } => RenderedCondition::And {
            conditions: conditions
                .iter()
                .map(|c| render_condition(c, environment_id, resolver))
                .collect(),
        },
        Or { conditions } => RenderedCondition::Or {
            conditions: conditions
                .iter()
                .map(|c| render_condition(c, environment_id, resolver))
                .collect(),
        },
        Not { condition } => RenderedCondition::Not {
            condition: Box::new(render_condition(condition, environment_id, resolver)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confplane_core::model::PathSegment;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeResolver(HashMap<(Uuid, String, Uuid), serde_json::Value>);

    impl ConfigValueResolver for FakeResolver {
        fn resolve_config_value(
            &self,
            project_id: Uuid,
            config_name: &str,
            environment_id: Uuid,
        ) -> Option<serde_json::Value> {
            self.0
                .get(&(project_id, config_name.to_string(), environment_id))
                .cloned()
        }
    }

    #[test]
    fn resolves_reference_inside_condition_value() {
        let project_id = Uuid::new_v4();
        let env = Uuid::new_v4();
        let mut store = HashMap::new();
        store.insert(
            (project_id, "A".to_string(), env),
            json!({"threshold": 100}),
        );
        let resolver = FakeResolver(store);

        let o = Override {
            name: "B".into(),
            conditions: vec![Condition::GreaterThan {
                property: "score".into(),
                value: Value::Reference {
                    project_id,
                    config_name: "A".into(),
                    path: vec![PathSegment::Key("threshold".into())],
                },
            }],
            value: Value::Literal {
                value: json!({"tier": "premium"}),
            },
        };

        let rendered = render_overrides(&[o], env, &resolver);
        match &rendered[0].conditions[0] {
            RenderedCondition::GreaterThan { value, .. } => {
                assert_eq!(*value, Some(json!(100)));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn missing_referenced_config_yields_undefined() {
        let project_id = Uuid::new_v4();
        let env = Uuid::new_v4();
        let resolver = FakeResolver(HashMap::new());

        let o = Override {
            name: "B".into(),
            conditions: vec![],
            value: Value::Reference {
                project_id,
                config_name: "missing".into(),
                path: vec![PathSegment::Key("x".into())],
            },
        };

        let rendered = render_overrides(&[o], env, &resolver);
        assert_eq!(rendered[0].value, None);
    }
}
