//! JSON coercions applied at the plugin RPC boundary and during step result
//! normalisation.

use serde_json::{Map as JsonMap, Number, Value};

/// True when the text plausibly holds a JSON document (object or array).
pub fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

/// Convert integer-valued floats back to integers, recursively.
///
/// JSON-like wire formats collapse integers to floats in transit; restoring
/// them keeps Unix-timestamp-sized values out of exponential notation. Real
/// fractional values are preserved unchanged.
pub fn restore_integers(value: &mut Value) {
    match value {
        Value::Number(number) => {
            if let Some(float) = number.as_f64()
                && number.as_i64().is_none()
                && number.as_u64().is_none()
                && float.fract() == 0.0
                && float >= i64::MIN as f64
                && float <= i64::MAX as f64
            {
                *value = Value::Number(Number::from(float as i64));
            }
        }
        Value::Array(items) => {
            for item in items {
                restore_integers(item);
            }
        }
        Value::Object(map) => {
            for (_, child) in map.iter_mut() {
                restore_integers(child);
            }
        }
        _ => {}
    }
}

/// Parse textual JSON bodies inside an action result in place.
///
/// For each of the `req` and `res` sub-maps, a string `body` that holds JSON
/// is replaced by its parsed structure and the original text is preserved
/// under `rawbody`. Non-JSON bodies are left untouched.
pub fn normalize_recorded_bodies(result: &mut JsonMap<String, Value>) {
    for key in ["req", "res"] {
        if let Some(Value::Object(section)) = result.get_mut(key) {
            normalize_body(section);
        }
    }
}

fn normalize_body(section: &mut JsonMap<String, Value>) {
    let Some(Value::String(body_text)) = section.get("body") else {
        return;
    };
    if !looks_like_json(body_text) {
        return;
    }
    let Ok(parsed) = serde_json::from_str::<Value>(body_text) else {
        return;
    };
    let raw = section
        .get("body")
        .cloned()
        .unwrap_or(Value::Null);
    section.insert("rawbody".to_string(), raw);
    section.insert("body".to_string(), parsed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn restores_integer_valued_floats_at_depth() {
        let mut value = json!({
            "code": 200.0,
            "ts": 1735689600.0,
            "ratio": 0.5,
            "nested": {"count": 3.0, "items": [1.0, 2.5]}
        });

        restore_integers(&mut value);

        assert_eq!(value["code"], json!(200));
        assert_eq!(value["ts"], json!(1735689600i64));
        assert_eq!(value["ratio"], json!(0.5));
        assert_eq!(value["nested"]["count"], json!(3));
        assert_eq!(value["nested"]["items"], json!([1, 2.5]));
    }

    #[test]
    fn json_body_is_parsed_and_raw_preserved() {
        let mut result = json!({
            "res": {"code": 200, "body": "{\"token\": \"abc\"}"}
        })
        .as_object()
        .expect("object")
        .clone();

        normalize_recorded_bodies(&mut result);

        assert_eq!(result["res"]["body"]["token"], "abc");
        assert_eq!(result["res"]["rawbody"], "{\"token\": \"abc\"}");
    }

    #[test]
    fn non_json_body_is_untouched() {
        let mut result = json!({
            "res": {"code": 200, "body": "plain text"}
        })
        .as_object()
        .expect("object")
        .clone();

        normalize_recorded_bodies(&mut result);

        assert_eq!(result["res"]["body"], "plain text");
        assert!(result["res"].get("rawbody").is_none());
    }

    #[test]
    fn invalid_json_body_is_untouched() {
        let mut result = json!({
            "req": {"body": "{not json"}
        })
        .as_object()
        .expect("object")
        .clone();

        normalize_recorded_bodies(&mut result);

        assert_eq!(result["req"]["body"], "{not json");
        assert!(result["req"].get("rawbody").is_none());
    }
}
