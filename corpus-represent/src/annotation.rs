//! Deterministic flattening for `annotation_text` (spec.md §4.6:
//! "optionally, a deterministically flattened textual form (keys sorted,
//! dotted paths for maps, indexed paths for arrays)").

use serde_json::Value;

/// Flattens a JSON value into a deterministic, sorted list of
/// `path = value` lines suitable for embedding as `annotation_text`.
pub fn flatten_json(value: &Value) -> String {
    let mut lines = Vec::new();
    flatten_into(value, String::new(), &mut lines);
    lines.sort();
    lines.join("\n")
}

fn flatten_into(value: &Value, prefix: String, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                out.push(format!("{prefix} = {{}}"));
                return;
            }
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                let child_prefix = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                flatten_into(&map[key], child_prefix, out);
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push(format!("{prefix} = []"));
                return;
            }
            for (i, item) in items.iter().enumerate() {
                let child_prefix = format!("{prefix}[{i}]");
                flatten_into(item, child_prefix, out);
            }
        }
        Value::String(s) => out.push(format!("{prefix} = {s}")),
        Value::Number(n) => out.push(format!("{prefix} = {n}")),
        Value::Bool(b) => out.push(format!("{prefix} = {b}")),
        Value::Null => out.push(format!("{prefix} = null")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_nested_maps_and_arrays_deterministically() {
        let value = json!({
            "b": 1,
            "a": { "z": "last", "y": "first" },
            "tags": ["x", "y"],
        });
        let flat = flatten_json(&value);
        let lines: Vec<&str> = flat.lines().collect();
        assert_eq!(
            lines,
            vec!["a.y = first", "a.z = last", "b = 1", "tags[0] = x", "tags[1] = y"]
        );
    }

    #[test]
    fn empty_containers_render_as_empty_literal() {
        assert_eq!(flatten_json(&json!({})), " = {}");
        assert_eq!(flatten_json(&json!([])), " = []");
    }
}
