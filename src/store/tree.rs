//! Helpers for treating a `serde_json::Value` as a slash-addressed document
//! tree, with the write semantics of the realtime database: writing `null`
//! deletes a node and parents left without children disappear with it.

use serde_json::{Map, Value};

pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments(path) {
        node = node.as_object()?.get(segment)?;
    }

    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Value at `path`, or `Value::Null` when absent.
pub fn get_or_null(root: &Value, path: &str) -> Value {
    get(root, path).cloned().unwrap_or(Value::Null)
}

/// Replaces the node at `path` with `value`.
pub fn put(root: &mut Value, path: &str, value: Value) {
    put_at(root, &segments(path), value);
}

/// Replaces each child of `path` named in `value`, leaving siblings alone.
/// A non-object value behaves like `put`.
pub fn patch(root: &mut Value, path: &str, value: Value) {
    match value {
        Value::Object(fields) => {
            let base = segments(path);
            for (key, child) in fields {
                let mut segs = base.clone();
                segs.extend(segments(&key));
                put_at(root, &segs, child);
            }
        }
        other => put(root, path, other),
    }
}

// Returns true when the node became empty and should be pruned by its parent.
fn put_at(node: &mut Value, segs: &[&str], value: Value) -> bool {
    let Some((head, rest)) = segs.split_first() else {
        *node = value;
        return is_empty(node);
    };

    if !node.is_object() {
        if value.is_null() {
            return is_empty(node);
        }
        *node = Value::Object(Map::new());
    }

    let Value::Object(children) = node else {
        return false;
    };

    let child = children.entry(head.to_string()).or_insert(Value::Null);
    if put_at(child, rest, value) {
        children.remove(*head);
    }

    children.is_empty()
}

fn is_empty(node: &Value) -> bool {
    match node {
        Value::Null => true,
        Value::Object(children) => children.is_empty(),
        _ => false,
    }
}
