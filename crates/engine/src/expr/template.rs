//! `{…}` template rendering over the expression evaluator.

use serde_json::{Map as JsonMap, Value};
use tracing::warn;

use crate::error::ProbeError;

use super::{Evaluator, value_to_display};

/// Outcome of a lenient template render.
#[derive(Debug, Default)]
pub struct Rendered {
    /// The rendered text, with `[SecurityError: …]` tokens in place of
    /// refused segments.
    pub text: String,
    /// Every evaluation problem encountered, security violations first
    /// among equals in severity: their presence must fail the step.
    pub issues: Vec<ProbeError>,
}

impl Rendered {
    /// First security violation, if any segment was refused.
    pub fn security_violation(&self) -> Option<&ProbeError> {
        self.issues.iter().find(|issue| issue.is_security())
    }
}

/// Render all `{…}` segments of `input` against `env`.
///
/// Text without braces passes through byte-for-byte. A `{` with no closing
/// `}` is preserved as-is, matching the rule that malformed templates are
/// not part of the grammar.
pub fn render(evaluator: &Evaluator, input: &str, env: &Value) -> Rendered {
    if !input.contains('{') {
        return Rendered {
            text: input.to_string(),
            issues: Vec::new(),
        };
    }

    let mut output = String::with_capacity(input.len());
    let mut issues = Vec::new();
    let mut remainder = input;

    while let Some(start) = remainder.find('{') {
        let (before, from_brace) = remainder.split_at(start);
        output.push_str(before);

        let Some(end) = from_brace.find('}') else {
            output.push_str(from_brace);
            remainder = "";
            break;
        };

        let expression = from_brace[1..end].trim();
        if expression.is_empty() {
            // Empty braces are literal text, not a template segment.
            output.push_str(&from_brace[..=end]);
        } else {
            match evaluator.eval(expression, env) {
                Ok(value) => output.push_str(&value_to_display(&value)),
                Err(error) if error.is_security() => {
                    output.push_str(&format!("[SecurityError: {}]", error.message));
                    issues.push(error);
                }
                Err(error) => {
                    // Leave the segment as written; the author sees their own
                    // text and the log explains why it did not render.
                    warn!(expression, %error, "template segment failed to evaluate");
                    output.push_str(&from_brace[..=end]);
                    issues.push(error);
                }
            }
        }
        remainder = &from_brace[end + 1..];
    }

    output.push_str(remainder);
    Rendered { text: output, issues }
}

/// Recursively render the string leaves of a mapping.
pub fn render_map(evaluator: &Evaluator, map: &JsonMap<String, Value>, env: &Value) -> (JsonMap<String, Value>, Vec<ProbeError>) {
    let mut issues = Vec::new();
    let rendered = render_value(evaluator, &Value::Object(map.clone()), env, &mut issues);
    match rendered {
        Value::Object(out) => (out, issues),
        _ => (map.clone(), issues),
    }
}

fn render_value(evaluator: &Evaluator, value: &Value, env: &Value, issues: &mut Vec<ProbeError>) -> Value {
    match value {
        Value::String(text) => {
            let mut rendered = render(evaluator, text, env);
            issues.append(&mut rendered.issues);
            Value::String(rendered.text)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(evaluator, item, env, issues))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = JsonMap::new();
            for (key, child) in map {
                out.insert(key.clone(), render_value(evaluator, child, env, issues));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
