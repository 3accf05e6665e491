//! Path and JSON tree helpers shared by the backends.

use serde_json::{Map, Value};

/// Split a path into its non-empty segments.
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join a parent path and a child key.
pub(crate) fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}/{key}")
    }
}

/// Whether one path is an ancestor of (or equal to) the other.
pub(crate) fn overlaps(a: &[String], b: &[&str]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Drop nulls and empty objects, recursively.
pub(crate) fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            (!map.is_empty()).then_some(Value::Object(map))
        }
        other => Some(other),
    }
}

/// Read the subtree at `segs`.
pub(crate) fn get_at<'a, S: AsRef<str>>(root: &'a Value, segs: &[S]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segs {
        node = node.as_object()?.get(seg.as_ref())?;
    }
    (!node.is_null()).then_some(node)
}

/// Replace (or with `None`, delete) the subtree at `segs`, pruning any
/// parents left empty.
pub(crate) fn set_at(node: &mut Value, segs: &[&str], value: Option<Value>) {
    let value = value.and_then(normalize);
    let Some((head, rest)) = segs.split_first() else {
        *node = value.unwrap_or(Value::Null);
        return;
    };
    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_at(child, rest, value);
        if child.is_null() {
            map.remove(*head);
        }
    }
    if node.as_object().is_some_and(Map::is_empty) {
        *node = Value::Null;
    }
}

/// Direct children of a value (empty unless it is an object).
pub(crate) fn children(value: Option<&Value>) -> Map<String, Value> {
    value
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = Value::Null;
        set_at(&mut root, &["rooms", "r1", "meta"], Some(json!({"a": 1})));
        assert_eq!(root, json!({"rooms": {"r1": {"meta": {"a": 1}}}}));
    }

    #[test]
    fn delete_prunes_empty_parents() {
        let mut root = json!({"rooms": {"r1": {"meta": 1}}, "directory": {"r1": 2}});
        set_at(&mut root, &["rooms", "r1", "meta"], None);
        assert_eq!(root, json!({"directory": {"r1": 2}}));
    }

    #[test]
    fn null_fields_are_dropped_on_write() {
        let mut root = Value::Null;
        set_at(&mut root, &["x"], Some(json!({"keep": 1, "gone": null, "empty": {}})));
        assert_eq!(root, json!({"x": {"keep": 1}}));
    }

    #[test]
    fn get_walks_segments() {
        let root = json!({"a": {"b": {"c": 3}}});
        assert_eq!(get_at(&root, &["a", "b", "c"]), Some(&json!(3)));
        assert_eq!(get_at(&root, &["a", "x"]), None);
        assert_eq!(get_at::<&str>(&root, &[]), Some(&root));
    }

    #[test]
    fn overlap_is_prefix_in_either_direction() {
        let watched = vec!["rooms".to_string(), "r1".to_string()];
        assert!(overlaps(&watched, &["rooms", "r1", "meta"]));
        assert!(overlaps(&watched, &["rooms"]));
        assert!(!overlaps(&watched, &["rooms", "r2"]));
        assert!(!overlaps(&watched, &["directory"]));
    }

    #[test]
    fn join_handles_root() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
    }
}
