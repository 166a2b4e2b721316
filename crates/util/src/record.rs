//! Parameter binding between generic mappings and tagged records.
//!
//! Action implementations declare plain serde structs for their
//! configuration; `map_to_record` binds a `with` mapping onto such a struct
//! with the lenient numeric coercions YAML and the wire format call for
//! (integers arriving as floats, booleans and numbers arriving as strings).
//! `record_to_map` is the inverse projection through the same serde tags.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map as JsonMap, Number, Value};
use thiserror::Error;

/// Binding failure between a mapping and a tagged record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Deserialization failed; serde's message names the offending field,
    /// including missing `required` fields.
    #[error("cannot bind parameters: {0}")]
    Bind(String),
    /// Serialization produced something other than a mapping.
    #[error("record does not serialize to a mapping")]
    NotAMap,
}

/// Bind a generic mapping onto a serde-tagged record.
///
/// Numeric coercion is applied first: integer-valued floats become integers
/// everywhere in the tree. When strict deserialization fails, a second pass
/// also accepts `"true"`/`"false"` strings as booleans and numeric strings
/// as numbers before giving up.
pub fn map_to_record<T: DeserializeOwned>(params: &JsonMap<String, Value>) -> Result<T, RecordError> {
    let mut value = Value::Object(params.clone());
    crate::json::restore_integers(&mut value);

    match serde_json::from_value::<T>(value.clone()) {
        Ok(record) => Ok(record),
        Err(strict_error) => {
            coerce_scalar_strings(&mut value);
            serde_json::from_value::<T>(value).map_err(|_| RecordError::Bind(strict_error.to_string()))
        }
    }
}

/// Project a serde-tagged record back into a generic mapping.
pub fn record_to_map<T: Serialize>(record: &T) -> Result<JsonMap<String, Value>, RecordError> {
    match serde_json::to_value(record).map_err(|error| RecordError::Bind(error.to_string()))? {
        Value::Object(map) => Ok(map),
        _ => Err(RecordError::NotAMap),
    }
}

fn coerce_scalar_strings(value: &mut Value) {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.eq_ignore_ascii_case("true") {
                *value = Value::Bool(true);
            } else if trimmed.eq_ignore_ascii_case("false") {
                *value = Value::Bool(false);
            } else if let Ok(int) = trimmed.parse::<i64>() {
                *value = Value::Number(int.into());
            } else if let Ok(float) = trimmed.parse::<f64>()
                && let Some(number) = Number::from_f64(float)
            {
                *value = Value::Number(number);
            }
        }
        Value::Array(items) => {
            for item in items {
                coerce_scalar_strings(item);
            }
        }
        Value::Object(map) => {
            for (_, child) in map.iter_mut() {
                coerce_scalar_strings(child);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct HttpConfig {
        url: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        insecure: bool,
        #[serde(default)]
        headers: JsonMap<String, Value>,
    }

    fn as_map(value: Value) -> JsonMap<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn binds_with_integer_from_float() {
        let params = as_map(json!({"url": "https://example.com", "timeout": 30.0}));
        let config: HttpConfig = map_to_record(&params).expect("bind");
        assert_eq!(config.timeout, Some(30));
    }

    #[test]
    fn binds_bool_and_number_from_strings() {
        let params = as_map(json!({"url": "https://example.com", "insecure": "true", "timeout": "15"}));
        let config: HttpConfig = map_to_record(&params).expect("bind");
        assert!(config.insecure);
        assert_eq!(config.timeout, Some(15));
    }

    #[test]
    fn missing_required_field_reports_its_name() {
        let params = as_map(json!({"method": "GET"}));
        let error = map_to_record::<HttpConfig>(&params).expect_err("should fail");
        assert!(error.to_string().contains("url"), "unexpected error: {error}");
    }

    #[test]
    fn round_trip_preserves_recognised_fields() {
        let params = as_map(json!({
            "url": "https://example.com",
            "method": "POST",
            "headers": {"accept": "application/json"}
        }));

        let config: HttpConfig = map_to_record(&params).expect("bind");
        let projected = record_to_map(&config).expect("project");

        for key in ["url", "method", "headers"] {
            assert_eq!(projected.get(key), params.get(key), "field {key}");
        }
    }
}
