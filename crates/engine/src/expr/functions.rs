//! Registered helper functions available to expressions.
//!
//! Exactly two are exposed: `match_json` for structural comparison with
//! regex-capable leaves, and `diff_json` for a readable difference listing.
//! Both demand exactly two mapping arguments.

use regex::Regex;
use serde_json::Value;

/// Deep structural match of `source` against `pattern`.
///
/// Every key in `pattern` must exist in `source` and match recursively;
/// extra keys in `source` are ignored. A pattern string of the form
/// `/regex/` is matched against the canonical string form of the source
/// value. Numbers compare on canonical string forms so `200` and `200.0`
/// agree.
pub fn match_json(source: &Value, pattern: &Value) -> Result<bool, String> {
    require_maps("match_json", source, pattern)?;
    match_value(source, pattern)
}

/// Human-readable difference listing between two mappings.
///
/// Returns `"No diff"` when the structures agree, otherwise one line per
/// differing path.
pub fn diff_json(left: &Value, right: &Value) -> Result<String, String> {
    require_maps("diff_json", left, right)?;
    let mut lines = Vec::new();
    diff_value("", left, right, &mut lines);
    if lines.is_empty() {
        Ok("No diff".to_string())
    } else {
        Ok(lines.join("\n"))
    }
}

fn require_maps(name: &str, a: &Value, b: &Value) -> Result<(), String> {
    if a.is_object() && b.is_object() {
        Ok(())
    } else {
        Err(format!("{name} requires exactly two mapping arguments"))
    }
}

fn match_value(source: &Value, pattern: &Value) -> Result<bool, String> {
    match (source, pattern) {
        (_, Value::String(expected)) => {
            if let Some(regex_text) = regex_form(expected) {
                let regex = Regex::new(regex_text).map_err(|error| format!("invalid pattern '{expected}': {error}"))?;
                return Ok(regex.is_match(&canonical_text(source)));
            }
            Ok(canonical_text(source) == *expected)
        }
        (Value::Object(source_map), Value::Object(pattern_map)) => {
            for (key, expected) in pattern_map {
                match source_map.get(key) {
                    Some(actual) => {
                        if !match_value(actual, expected)? {
                            return Ok(false);
                        }
                    }
                    None => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Array(source_items), Value::Array(pattern_items)) => {
            if source_items.len() != pattern_items.len() {
                return Ok(false);
            }
            for (actual, expected) in source_items.iter().zip(pattern_items) {
                if !match_value(actual, expected)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Number(_), Value::Number(_)) => Ok(canonical_text(source) == canonical_text(pattern)),
        _ => Ok(source == pattern),
    }
}

fn diff_value(path: &str, left: &Value, right: &Value, lines: &mut Vec<String>) {
    match (left, right) {
        (Value::Object(left_map), Value::Object(right_map)) => {
            for (key, left_child) in left_map {
                let child_path = join_path(path, key);
                match right_map.get(key) {
                    Some(right_child) => diff_value(&child_path, left_child, right_child, lines),
                    None => lines.push(format!("{child_path}: {} != <missing>", canonical_text(left_child))),
                }
            }
            for (key, right_child) in right_map {
                if !left_map.contains_key(key) {
                    let child_path = join_path(path, key);
                    lines.push(format!("{child_path}: <missing> != {}", canonical_text(right_child)));
                }
            }
        }
        (Value::Array(left_items), Value::Array(right_items)) => {
            let shared = left_items.len().min(right_items.len());
            for (index, (left_child, right_child)) in left_items.iter().zip(right_items).enumerate().take(shared) {
                diff_value(&format!("{path}[{index}]"), left_child, right_child, lines);
            }
            for (index, left_child) in left_items.iter().enumerate().skip(shared) {
                lines.push(format!("{path}[{index}]: {} != <missing>", canonical_text(left_child)));
            }
            for (index, right_child) in right_items.iter().enumerate().skip(shared) {
                lines.push(format!("{path}[{index}]: <missing> != {}", canonical_text(right_child)));
            }
        }
        _ => {
            if canonical_text(left) != canonical_text(right) {
                lines.push(format!("{path}: {} != {}", canonical_text(left), canonical_text(right)));
            }
        }
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn regex_form(text: &str) -> Option<&str> {
    let stripped = text.strip_prefix('/')?.strip_suffix('/')?;
    if stripped.is_empty() { None } else { Some(stripped) }
}

/// Canonical string form used for leaf comparisons: integers render without
/// a decimal point even when they arrived as floats.
fn canonical_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                int.to_string()
            } else if let Some(float) = number.as_f64() {
                if float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
                    format!("{}", float as i64)
                } else {
                    float.to_string()
                }
            } else {
                number.to_string()
            }
        }
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
