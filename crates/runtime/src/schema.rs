//! Tool input-schema repair.

use serde_json::{Map, Value};

/// Recursively add `items` to array schemas that are missing it.
///
/// Some MCP servers advertise array properties without the `items` field the
/// model provider requires, which gets the whole tool rejected. The schema is
/// patched in place so the cached descriptors keep the fix on every
/// subsequent read. Returns the number of fields fixed.
///
/// Non-object values are skipped rather than rejected, and a second pass over
/// an already-repaired schema reports zero fixes.
pub fn normalize_schema(schema: &mut Value) -> usize {
    let Value::Object(map) = schema else {
        return 0;
    };

    let mut fixed = 0;
    if map.get("type").and_then(Value::as_str) == Some("array") && !map.contains_key("items") {
        map.insert("items".to_string(), Value::Object(Map::new()));
        fixed += 1;
    }

    for value in map.values_mut() {
        match value {
            Value::Object(_) => fixed += normalize_schema(value),
            Value::Array(items) => {
                for item in items.iter_mut().filter(|item| item.is_object()) {
                    fixed += normalize_schema(item);
                }
            }
            _ => {}
        }
    }

    fixed
}
