//! Override evaluator (spec.md §4.5).
//!
//! Pure, non-suspending: given a base value, a list of already-*rendered*
//! overrides (see [`crate::reference`]) and a request context, picks the
//! first override whose conditions all match and returns its value, or the
//! base value if none match. Every condition also produces a trace entry so
//! callers can show callers why a request resolved the way it did.

use confplane_core::model::RenderedCondition;
use confplane_core::model::{Context, RenderedOverride};
use serde_json::Value as Json;

/// One diagnostic per condition evaluated, in evaluation order.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub override_name: Option<String>,
    pub matched: bool,
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    pub final_value: Json,
    pub matched_override: Option<String>,
    pub trace: Vec<TraceEntry>,
}

/// Evaluates `overrides` (already rendered) against `context`, falling back
/// to `base_value` when none match. First-match-wins, in list order.
pub fn evaluate(base_value: &Json, overrides: &[RenderedOverride], context: &Context) -> EvalResult {
    let mut trace = Vec::new();

    for o in overrides {
        let mut all_matched = true;
        for c in &o.conditions {
            let (matched, diagnostic) = eval_condition(c, context);
            trace.push(TraceEntry {
                override_name: Some(o.name.clone()),
                matched,
                diagnostic,
            });
            if !matched {
                all_matched = false;
            }
        }
        if all_matched {
            return EvalResult {
                final_value: o.value.clone().unwrap_or(Json::Null),
                matched_override: Some(o.name.clone()),
                trace,
            };
        }
    }

    EvalResult {
        final_value: base_value.clone(),
        matched_override: None,
        trace,
    }
}

/// Evaluates a single condition. Returns `(matched, diagnostic)`; the
/// diagnostic is set only when evaluation hit a type mismatch or a missing
/// property, mirroring spec.md §7's "condition-failed outcome with a
/// textual diagnostic" propagation policy.
fn eval_condition(condition: &RenderedCondition, context: &Context) -> (bool, Option<String>) {
    use RenderedCondition::*;
    match condition {
        Equals { property, value } => match (context.get(property), value) {
            (Some(ctx), Some(exp)) => {
                let exp = coerce(ctx, exp);
                (values_equal(ctx, &exp), None)
            }
            _ => (false, Some(format!("property `{property}` missing"))),
        },
        In { property, value } => membership(property, value, context, true),
        NotIn { property, value } => membership(property, value, context, false),
        LessThan { property, value } => ordering(property, value, context, |o| o == std::cmp::Ordering::Less),
        LessThanOrEqual { property, value } => {
            ordering(property, value, context, |o| o != std::cmp::Ordering::Greater)
        }
        GreaterThan { property, value } => {
            ordering(property, value, context, |o| o == std::cmp::Ordering::Greater)
        }
        GreaterThanOrEqual { property, value } => {
            ordering(property, value, context, |o| o != std::cmp::Ordering::Less)
        }
        Segmentation {
            property,
            percentage,
            salt,
        } => match context.get(property) {
            Some(ctx) if !ctx.is_null() => {
                let bucket = segmentation_bucket(ctx, salt);
                (((bucket as f64) < *percentage), None)
            }
            _ => (false, Some(format!("property `{property}` missing or null"))),
        },
        And { conditions } => {
            let mut all = true;
            let mut diag = None;
            for c in conditions {
                let (m, d) = eval_condition(c, context);
                if !m {
                    all = false;
                }
                if diag.is_none() {
                    diag = d;
                }
            }
            (all, diag)
        }
        Or { conditions } => {
            let mut any = false;
            let mut diag = None;
            for c in conditions {
                let (m, d) = eval_condition(c, context);
                if m {
                    any = true;
                }
                if diag.is_none() {
                    diag = d;
                }
            }
            (any, diag)
        }
        Not { condition } => {
            let (m, d) = eval_condition(condition, context);
            (!m, d)
        }
    }
}

fn membership(
    property: &str,
    value: &Option<Json>,
    context: &Context,
    want_present: bool,
) -> (bool, Option<String>) {
    let ctx = match context.get(property) {
        Some(v) => v,
        None => return (false, Some(format!("property `{property}` missing"))),
    };
    let expected = match value {
        Some(Json::Array(items)) => items,
        _ => return (false, Some("`in`/`not_in` expects an array value".into())),
    };
    let present = expected
        .iter()
        .any(|e| values_equal(ctx, &coerce(ctx, e)));
    (present == want_present, None)
}

fn ordering(
    property: &str,
    value: &Option<Json>,
    context: &Context,
    test: impl Fn(std::cmp::Ordering) -> bool,
) -> (bool, Option<String>) {
    let ctx = match context.get(property) {
        Some(v) => v,
        None => return (false, Some(format!("property `{property}` missing"))),
    };
    let exp = match value {
        Some(v) => coerce(ctx, v),
        None => return (false, Some("comparison value is undefined".into())),
    };

    match (ctx, &exp) {
        (Json::Number(a), Json::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (test(a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)), None),
            _ => (false, Some("non-finite number comparison".into())),
        },
        (Json::String(a), Json::String(b)) => (test(a.cmp(b)), None),
        _ => (
            false,
            Some("ordering comparison requires both sides number or both string".into()),
        ),
    }
}

fn values_equal(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(a), Json::Number(b)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

/// Type-aligning coercion (spec.md §4.5): aligns `exp` towards `ctx`'s type.
fn coerce(ctx: &Json, exp: &Json) -> Json {
    match (ctx, exp) {
        (Json::Number(_), Json::String(s)) => {
            if let Ok(n) = s.parse::<f64>() {
                serde_json::Number::from_f64(n)
                    .map(Json::Number)
                    .unwrap_or_else(|| exp.clone())
            } else {
                exp.clone()
            }
        }
        (Json::Bool(_), Json::String(s)) => match s.as_str() {
            "true" => Json::Bool(true),
            "false" => Json::Bool(false),
            _ => exp.clone(),
        },
        (Json::Bool(_), Json::Number(n)) => Json::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        (Json::String(_), Json::Number(n)) => Json::String(n.to_string()),
        (Json::String(_), Json::Bool(b)) => Json::String(b.to_string()),
        _ => exp.clone(),
    }
}

/// `sum = 0; for each char c: sum = ((sum << 5) - sum + c) | int32`, bucket
/// `= |sum| mod 100`. Operates on `str(ctx) || salt`, exactly spec.md §4.5.
fn segmentation_bucket(ctx: &Json, salt: &str) -> u32 {
    let s = json_to_segmentation_string(ctx);
    let input = format!("{s}{salt}");
    let mut sum: i32 = 0;
    for c in input.chars() {
        sum = sum
            .wrapping_shl(5)
            .wrapping_sub(sum)
            .wrapping_add(c as i32);
    }
    (sum.unsigned_abs()) % 100
}

fn json_to_segmentation_string(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Number(n) => n.to_string(),
        Json::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Json)]) -> Context {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn rendered(name: &str, conditions: Vec<RenderedCondition>, value: Json) -> RenderedOverride {
        RenderedOverride {
            name: name.into(),
            conditions,
            value: Some(value),
        }
    }

    #[test]
    fn s1_first_match_wins_in_order() {
        let base = json!("base");
        let overrides = vec![
            rendered(
                "A",
                vec![RenderedCondition::Equals {
                    property: "tier".into(),
                    value: Some(json!("gold")),
                }],
                json!("a-value"),
            ),
            rendered(
                "B",
                vec![RenderedCondition::Equals {
                    property: "tier".into(),
                    value: Some(json!("gold")),
                }],
                json!("b-value"),
            ),
        ];
        let context = ctx(&[("tier", json!("gold"))]);
        let result = evaluate(&base, &overrides, &context);
        assert_eq!(result.final_value, json!("a-value"));
        assert_eq!(result.matched_override, Some("A".into()));
    }

    #[test]
    fn s1_no_match_falls_back_to_base() {
        let base = json!("base");
        let overrides = vec![rendered(
            "A",
            vec![RenderedCondition::Equals {
                property: "tier".into(),
                value: Some(json!("gold")),
            }],
            json!("a-value"),
        )];
        let context = ctx(&[("tier", json!("silver"))]);
        let result = evaluate(&base, &overrides, &context);
        assert_eq!(result.final_value, json!("base"));
        assert_eq!(result.matched_override, None);
    }

    #[test]
    fn s2_type_coercion_numeric_string_vs_number() {
        // base 0; override matches when context.age (number) < condition value "18" (string).
        let base = json!(0);
        let overrides = vec![rendered(
            "adult-gate",
            vec![RenderedCondition::LessThan {
                property: "age".into(),
                value: Some(json!("18")),
            }],
            json!(1),
        )];
        let context = ctx(&[("age", json!(17))]);
        let result = evaluate(&base, &overrides, &context);
        assert_eq!(result.final_value, json!(1));
    }

    #[test]
    fn coercion_is_stable() {
        let ctx_val = json!(42);
        let exp = json!("42");
        let coerced = coerce(&ctx_val, &exp);
        assert!(values_equal(&ctx_val, &coerced));
        let twice = coerce(&ctx_val, &coerced);
        assert_eq!(coerced, twice);
    }

    #[test]
    fn s3_segmentation_deterministic() {
        let context = ctx(&[("userId", json!("abc"))]);
        let cond = RenderedCondition::Segmentation {
            property: "userId".into(),
            percentage: 50.0,
            salt: "v1".into(),
        };
        let (first, _) = eval_condition(&cond, &context);
        let (second, _) = eval_condition(&cond, &context);
        assert_eq!(first, second);
    }

    #[test]
    fn segmentation_percentage_zero_never_matches() {
        let context = ctx(&[("userId", json!("any-user-at-all"))]);
        let cond = RenderedCondition::Segmentation {
            property: "userId".into(),
            percentage: 0.0,
            salt: "v1".into(),
        };
        let (matched, _) = eval_condition(&cond, &context);
        assert!(!matched);
    }

    #[test]
    fn segmentation_bucket_0_matches_percentage_at_least_1() {
        // Find a (property, salt) pair whose bucket is 0, then confirm percentage=1 matches.
        let mut found = None;
        for i in 0..10_000u32 {
            let candidate = format!("user-{i}");
            if segmentation_bucket(&json!(candidate), "salt") == 0 {
                found = Some(candidate);
                break;
            }
        }
        let user_id = found.expect("expected at least one bucket-0 value in range");
        let context = ctx(&[("userId", json!(user_id))]);
        let cond = RenderedCondition::Segmentation {
            property: "userId".into(),
            percentage: 1.0,
            salt: "salt".into(),
        };
        let (matched, _) = eval_condition(&cond, &context);
        assert!(matched);
    }

    #[test]
    fn segmentation_bucket_99_matches_only_percentage_100() {
        let mut found = None;
        for i in 0..10_000u32 {
            let candidate = format!("user-{i}");
            if segmentation_bucket(&json!(candidate), "salt") == 99 {
                found = Some(candidate);
                break;
            }
        }
        let user_id = found.expect("expected at least one bucket-99 value in range");
        let context = ctx(&[("userId", json!(user_id))]);
        let not_full = RenderedCondition::Segmentation {
            property: "userId".into(),
            percentage: 99.0,
            salt: "salt".into(),
        };
        let full = RenderedCondition::Segmentation {
            property: "userId".into(),
            percentage: 100.0,
            salt: "salt".into(),
        };
        assert!(!eval_condition(&not_full, &context).0);
        assert!(eval_condition(&full, &context).0);
    }

    #[test]
    fn missing_property_fails_but_not_inverts_under_and() {
        let base = json!("base");
        let overrides = vec![rendered(
            "needs-prop",
            vec![RenderedCondition::Equals {
                property: "missing".into(),
                value: Some(json!("x")),
            }],
            json!("override-value"),
        )];
        let context = Context::new();
        let result = evaluate(&base, &overrides, &context);
        assert_eq!(result.final_value, json!("base"));
    }

    #[test]
    fn missing_property_under_not_matches() {
        let context = Context::new();
        let cond = RenderedCondition::Not {
            condition: Box::new(RenderedCondition::Equals {
                property: "missing".into(),
                value: Some(json!("x")),
            }),
        };
        let (matched, _) = eval_condition(&cond, &context);
        assert!(matched);
    }

    #[test]
    fn ordering_mixed_types_yields_false_with_diagnostic() {
        let context = ctx(&[("score", json!(true))]);
        let cond = RenderedCondition::GreaterThan {
            property: "score".into(),
            value: Some(json!([1, 2])),
        };
        let (matched, diagnostic) = eval_condition(&cond, &context);
        assert!(!matched);
        assert!(diagnostic.is_some());
    }

    #[test]
    fn and_or_not_compose() {
        let context = ctx(&[("tier", json!("gold")), ("age", json!(30))]);
        let cond = RenderedCondition::And {
            conditions: vec![
                RenderedCondition::Equals {
                    property: "tier".into(),
                    value: Some(json!("gold")),
                },
                RenderedCondition::Or {
                    conditions: vec![
                        RenderedCondition::GreaterThan {
                            property: "age".into(),
                            value: Some(json!(18)),
                        },
                        RenderedCondition::Equals {
                            property: "age".into(),
                            value: Some(json!(0)),
                        },
                    ],
                },
            ],
        };
        let (matched, _) = eval_condition(&cond, &context);
        assert!(matched);
    }

    #[test]
    fn unresolved_reference_value_is_unequal_to_everything() {
        // An override value rendered to None (unresolved reference) yields
        // JSON null when selected as finalValue, per spec.md §4.6.
        let base = json!("base");
        let overrides = vec![rendered(
            "ref-override",
            vec![],
            Json::Null,
        )];
        let result = evaluate(&base, &overrides, &Context::new());
        assert_eq!(result.final_value, Json::Null);
    }

    #[test]
    fn equals_against_undefined_condition_value_never_matches() {
        let context = ctx(&[("score", json!(100))]);
        let cond = RenderedCondition::Equals {
            property: "score".into(),
            value: None,
        };
        let (matched, diagnostic) = eval_condition(&cond, &context);
        assert!(!matched);
        assert!(diagnostic.is_some());
    }
}
