//! Small text helpers shared by actions and the printer.

use serde_json::{Map as JsonMap, Value};

/// Stringify every value under the `headers` key of an action result.
///
/// Header values may arrive as scalars or as arrays of scalars; arrays are
/// joined with `", "` the way HTTP folds repeated headers.
pub fn header_to_string_value(data: &mut JsonMap<String, Value>) {
    let Some(Value::Object(headers)) = data.get_mut("headers") else {
        return;
    };
    for (_, value) in headers.iter_mut() {
        let rendered = match value {
            Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(", "),
            ref other => scalar_text(other),
        };
        *value = Value::String(rendered);
    }
}

/// Capitalise the first letter of every `sep`-separated part.
///
/// `title_case("content-type", "-")` yields `Content-Type`.
pub fn title_case(text: &str, sep: &str) -> String {
    if sep.is_empty() {
        return capitalize(text);
    }
    text.split(sep).map(capitalize).collect::<Vec<_>>().join(sep)
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
