//! Generic visitor over JSON trees.
//!
//! Used wherever nested results or variables must be searched or rewritten
//! (id remapping, id discovery in optimistic and server responses).

use serde_json::Value;
use std::fmt;

/// One step into a JSON tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// Object member.
    Key(String),
    /// Array element.
    Index(usize),
}

/// Location of a node, from the root.
pub type ValuePath = Vec<PathSegment>;

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, ".{key}"),
            PathSegment::Index(idx) => write!(f, "[{idx}]"),
        }
    }
}

/// Rewrites every node matching `predicate` with `transform`.
///
/// The walk is depth-first, parents before children. A node that matched is
/// not descended into after being transformed. Returns the number of
/// transformed nodes.
pub fn rewrite<P, T>(value: &mut Value, predicate: P, mut transform: T) -> usize
where
    P: Fn(&[PathSegment], &Value) -> bool,
    T: FnMut(&[PathSegment], &mut Value),
{
    let mut path = Vec::new();
    rewrite_at(value, &mut path, &predicate, &mut transform)
}

fn rewrite_at<P, T>(value: &mut Value, path: &mut ValuePath, predicate: &P, transform: &mut T) -> usize
where
    P: Fn(&[PathSegment], &Value) -> bool,
    T: FnMut(&[PathSegment], &mut Value),
{
    if predicate(path, value) {
        transform(path, value);
        return 1;
    }

    let mut count = 0;
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                path.push(PathSegment::Key(key.clone()));
                count += rewrite_at(child, path, predicate, transform);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter_mut().enumerate() {
                path.push(PathSegment::Index(idx));
                count += rewrite_at(child, path, predicate, transform);
                path.pop();
            }
        }
        _ => {}
    }
    count
}

/// Collects `(path, node)` for every node matching `predicate`.
///
/// Matching nodes are still descended into, so nested matches are found.
pub fn collect<P>(value: &Value, predicate: P) -> Vec<(ValuePath, Value)>
where
    P: Fn(&[PathSegment], &Value) -> bool,
{
    let mut found = Vec::new();
    let mut path = Vec::new();
    collect_at(value, &mut path, &predicate, &mut found);
    found
}

fn collect_at<P>(value: &Value, path: &mut ValuePath, predicate: &P, found: &mut Vec<(ValuePath, Value)>)
where
    P: Fn(&[PathSegment], &Value) -> bool,
{
    if predicate(path, value) {
        found.push((path.clone(), value.clone()));
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(PathSegment::Key(key.clone()));
                collect_at(child, path, predicate, found);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                path.push(PathSegment::Index(idx));
                collect_at(child, path, predicate, found);
                path.pop();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rewrite_replaces_matching_strings() {
        let mut value = json!({
            "id": "local-1",
            "items": [{"parent": "local-1"}, {"parent": "other"}],
            "nested": {"deep": ["local-1"]}
        });

        let count = rewrite(
            &mut value,
            |_, node| node.as_str() == Some("local-1"),
            |_, node| *node = json!("server-1"),
        );

        assert_eq!(count, 3);
        assert!(!value.to_string().contains("local-1"));
        assert_eq!(value["items"][1]["parent"], json!("other"));
    }

    #[test]
    fn rewrite_reports_paths() {
        let mut value = json!({"a": [{"b": 1}]});
        let mut seen = Vec::new();
        rewrite(
            &mut value,
            |_, node| node.is_number(),
            |path, _| seen.push(path.iter().map(ToString::to_string).collect::<String>()),
        );
        assert_eq!(seen, vec![".a[0].b".to_string()]);
    }

    #[test]
    fn rewrite_does_not_descend_into_transformed_nodes() {
        let mut value = json!({"wrap": {"inner": 1}});
        let count = rewrite(
            &mut value,
            |_, node| node.is_object(),
            |_, node| *node = json!({"inner": {"again": true}}),
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn collect_finds_nested_matches() {
        let value = json!({"todo": {"id": "1", "owner": {"id": "2"}}});
        let found = collect(&value, |_, node| node.get("id").is_some());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, vec![PathSegment::Key("todo".into())]);
        assert_eq!(
            found[1].0,
            vec![PathSegment::Key("todo".into()), PathSegment::Key("owner".into())]
        );
    }
}
