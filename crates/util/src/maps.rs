//! Map merging primitives used for job defaults and iteration variables.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};

/// Merge string values from `over` on top of `base`.
///
/// Only string leaves of `over` participate; values of any other type are
/// ignored rather than coerced.
pub fn merge_string_maps(base: &IndexMap<String, String>, over: &JsonMap<String, Value>) -> IndexMap<String, String> {
    let mut merged = base.clone();
    for (key, value) in over {
        if let Value::String(text) = value {
            merged.insert(key.clone(), text.clone());
        }
    }
    merged
}

/// Recursively merge `over` on top of `base`.
///
/// Child mappings merge key by key; any non-mapping value in `over`
/// overwrites the corresponding `base` entry wholesale, including arrays.
pub fn merge_maps(base: &JsonMap<String, Value>, over: &JsonMap<String, Value>) -> JsonMap<String, Value> {
    let mut merged = base.clone();
    for (key, over_value) in over {
        match (merged.get(key), over_value) {
            (Some(Value::Object(base_child)), Value::Object(over_child)) => {
                let combined = merge_maps(base_child, over_child);
                merged.insert(key.clone(), Value::Object(combined));
            }
            _ => {
                merged.insert(key.clone(), over_value.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> JsonMap<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn string_merge_ignores_non_strings() {
        let mut base = IndexMap::new();
        base.insert("kept".to_string(), "old".to_string());
        base.insert("replaced".to_string(), "old".to_string());
        let over = as_map(json!({"replaced": "new", "number": 7, "flag": true}));

        let merged = merge_string_maps(&base, &over);

        assert_eq!(merged.get("kept").map(String::as_str), Some("old"));
        assert_eq!(merged.get("replaced").map(String::as_str), Some("new"));
        assert!(!merged.contains_key("number"));
        assert!(!merged.contains_key("flag"));
    }

    #[test]
    fn nested_maps_merge_and_scalars_overwrite() {
        let base = as_map(json!({
            "headers": {"accept": "application/json", "host": "a"},
            "timeout": 5
        }));
        let over = as_map(json!({
            "headers": {"host": "b"},
            "timeout": 30
        }));

        let merged = merge_maps(&base, &over);

        assert_eq!(merged["headers"]["accept"], "application/json");
        assert_eq!(merged["headers"]["host"], "b");
        assert_eq!(merged["timeout"], 30);
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let base = as_map(json!({"a": {"b": 1}, "c": [1, 2]}));
        let merged = merge_maps(&base, &JsonMap::new());
        assert_eq!(Value::Object(merged), Value::Object(base));
    }

    #[test]
    fn merge_is_associative_without_type_conflicts() {
        let a = as_map(json!({"x": {"one": 1}}));
        let b = as_map(json!({"x": {"two": 2}}));
        let c = as_map(json!({"x": {"three": 3}, "y": true}));

        let left = merge_maps(&merge_maps(&a, &b), &c);
        let right = merge_maps(&a, &merge_maps(&b, &c));

        assert_eq!(Value::Object(left), Value::Object(right));
    }
}
