//! Path helpers over a `serde_json::Value` tree.

use serde_json::{Map, Value};

/// Split a slash separated path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Borrow the subtree under `path`.
pub fn get<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for segment in path {
        node = node.as_object()?.get(*segment)?;
    }
    if node.is_null() { None } else { Some(node) }
}

/// Replace the subtree under `path`. Writing `null` removes it and prunes the
/// objects left empty on the way up.
pub fn set(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        return;
    };

    if value.is_null() {
        remove(root, parents, last);
        return;
    }

    let mut node = root;
    for segment in parents {
        node = as_object(node)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    as_object(node).insert(last.to_string(), value);
}

/// Borrow `node` as an object, replacing any scalar found on the way.
fn as_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(object) => object,
        _ => unreachable!("node was just replaced by an object"),
    }
}

fn remove(node: &mut Value, parents: &[&str], last: &str) -> bool {
    let Some(object) = node.as_object_mut() else {
        return false;
    };
    match parents.split_first() {
        None => {
            object.remove(last);
        }
        Some((head, rest)) => {
            let Some(child) = object.get_mut(*head) else {
                return false;
            };
            if remove(child, rest, last) {
                object.remove(*head);
            }
        }
    }
    object.is_empty()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = json!({});
        set(&mut root, &["submissions", "A", "current", "p1"], json!({"rank": 3}));
        assert_eq!(root["submissions"]["A"]["current"]["p1"]["rank"], 3);
        assert_eq!(
            get(&root, &["submissions", "A"]),
            Some(&json!({"current": {"p1": {"rank": 3}}}))
        );
    }

    #[test]
    fn null_write_prunes_empty_parents() {
        let mut root = json!({"submissions": {"A": {"current": {"p1": {"rank": 1}}}}, "totals": {}});
        set(&mut root, &["submissions", "A", "current", "p1"], Value::Null);
        assert!(get(&root, &["submissions"]).is_none());
        assert!(root.get("totals").is_some());
    }

    #[test]
    fn null_write_keeps_siblings() {
        let mut root = json!({"s": {"A": {"p1": 1, "p2": 2}}});
        set(&mut root, &["s", "A", "p1"], Value::Null);
        assert_eq!(root, json!({"s": {"A": {"p2": 2}}}));
    }

    #[test]
    fn overwrite_replaces_whole_subtree() {
        let mut root = json!({"history": {"A": {"1": {"results": {"p1": 1, "p2": 2}}}}});
        set(&mut root, &["history", "A", "1"], json!({"results": {"p3": 1}}));
        assert_eq!(root["history"]["A"]["1"], json!({"results": {"p3": 1}}));
    }
}
