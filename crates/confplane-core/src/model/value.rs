use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single step of a reference path: either an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// An authored value: either a literal JSON value, or a pointer into another
/// config's *base* value, resolved at render time (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Literal {
        value: serde_json::Value,
    },
    Reference {
        project_id: Uuid,
        config_name: String,
        path: Vec<PathSegment>,
    },
}

/// Walks `path` through `root`, stopping at the first null or non-indexable
/// step. Returns `None` ("undefined") rather than `Some(Value::Null)` only
/// when traversal could not reach the end of the path; a path that legally
/// terminates on a stored `null` yields `Some(Value::Null)`.
pub fn resolve_path(root: &serde_json::Value, path: &[PathSegment]) -> Option<serde_json::Value> {
    let mut current = root;
    for (i, segment) in path.iter().enumerate() {
        if current.is_null() && i > 0 {
            return None;
        }
        current = match (segment, current) {
            (PathSegment::Key(k), serde_json::Value::Object(map)) => map.get(k)?,
            (PathSegment::Index(idx), serde_json::Value::Array(arr)) => arr.get(*idx)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_object_path() {
        let root = json!({"a": {"b": [1, 2, {"c": "x"}]}});
        let path = vec![
            PathSegment::Key("a".into()),
            PathSegment::Key("b".into()),
            PathSegment::Index(2),
            PathSegment::Key("c".into()),
        ];
        assert_eq!(resolve_path(&root, &path), Some(json!("x")));
    }

    #[test]
    fn stops_at_null_intermediate() {
        let root = json!({"a": null});
        let path = vec![PathSegment::Key("a".into()), PathSegment::Key("b".into())];
        assert_eq!(resolve_path(&root, &path), None);
    }

    #[test]
    fn terminal_null_is_not_undefined() {
        let root = json!({"a": null});
        let path = vec![PathSegment::Key("a".into())];
        assert_eq!(resolve_path(&root, &path), Some(serde_json::Value::Null));
    }

    #[test]
    fn non_indexable_step_yields_undefined() {
        let root = json!({"a": 5});
        let path = vec![PathSegment::Key("a".into()), PathSegment::Key("b".into())];
        assert_eq!(resolve_path(&root, &path), None);
    }

    #[test]
    fn missing_key_yields_undefined() {
        let root = json!({"a": 1});
        let path = vec![PathSegment::Key("missing".into())];
        assert_eq!(resolve_path(&root, &path), None);
    }
}
