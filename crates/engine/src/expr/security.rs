//! Security layer wrapped around every expression evaluation.
//!
//! The evaluator is treated as a capability boundary: expressions arrive
//! from workflow files, which may be third-party authored. Before anything
//! is parsed the raw text is screened against a fixed banlist and the
//! environment-access rules; the evaluation environment itself is a
//! sanitised projection rather than the caller's live data.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map as JsonMap, Value};

use crate::error::ProbeError;

/// Maximum accepted expression length in characters.
pub const MAX_EXPRESSION_LEN: usize = 1000;

/// Wall-clock budget for a single evaluation.
pub const EVAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// String leaves longer than this are truncated in the projected env.
const MAX_PROJECTED_STRING: usize = 10_000;

/// Arrays longer than this are truncated in the projected env.
const MAX_PROJECTED_ARRAY: usize = 1000;

/// Textual fragments that are never allowed in an expression.
const BANNED_FRAGMENTS: &[&str] = &[
    "import", "eval", "exec", "system", "file", "require", "open", "read", "write", "delete", "remove", "reflect",
    "runtime", "__", "process.", "global.", "window.",
];

/// Substrings of environment variable names that refuse `env.NAME` access.
const BANNED_ENV_KEYWORDS: &[&str] = &[
    "SECRET", "PASSWORD", "CREDENTIAL", "API_KEY", "PRIVATE", "CERT", "SSH_KEY", "PATH", "HOME",
];

/// Context roots that survive the projection. Everything else at the top
/// level of the environment is dropped before the expression sees it.
const CONTEXT_ROOTS: &[&str] = &["vars", "logs", "outputs", "env", "res", "req", "rt", "iter", "unixtime"];

/// Result-data keys that also survive at the top level, for callers that
/// evaluate directly against an action result.
const SAFE_DATA_KEYS: &[&str] = &[
    "res", "result", "data", "response", "body", "status", "headers", "host", "name", "service", "url",
];

static ENV_ACCESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"env\.([A-Za-z_][A-Za-z0-9_]*)").expect("valid env access pattern"));

/// What a security violation does to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    /// Return a security-kind error to the caller (the default).
    #[default]
    ReturnError,
    /// Terminate the process with exit status 2.
    HardExit,
}

/// Screen raw expression text before parsing.
///
/// Checks, in order: length cap, banned fragments (case-insensitive
/// substring match), and banned environment variable names in `env.NAME`
/// accesses.
pub fn check_expression(expression: &str) -> Result<(), ProbeError> {
    if expression.chars().count() > MAX_EXPRESSION_LEN {
        return Err(ProbeError::security("expr.check", "expression exceeds the maximum length")
            .with_context("limit", MAX_EXPRESSION_LEN.to_string()));
    }

    let lowered = expression.to_lowercase();
    for fragment in BANNED_FRAGMENTS {
        if lowered.contains(fragment) {
            return Err(ProbeError::security("expr.check", "expression contains a banned fragment")
                .with_context("fragment", *fragment));
        }
    }

    for capture in ENV_ACCESS_PATTERN.captures_iter(expression) {
        let name = capture.get(1).map(|m| m.as_str()).unwrap_or_default();
        let upper = name.to_uppercase();
        for keyword in BANNED_ENV_KEYWORDS {
            if upper.contains(keyword) {
                return Err(
                    ProbeError::security("expr.check", "access to this environment variable is not allowed")
                        .with_context("variable", name),
                );
            }
        }
    }

    Ok(())
}

/// Project the caller's environment into the sanitised form the expression
/// actually evaluates against.
///
/// Top-level keys outside the known context roots and safe data keys are
/// dropped. Below the top level everything passes through, subject to the
/// string and array truncation limits at every depth.
pub fn sanitize_env(env: &Value) -> Value {
    let Value::Object(map) = env else {
        return truncate(env);
    };

    let mut projected = JsonMap::new();
    for (key, value) in map {
        if CONTEXT_ROOTS.contains(&key.as_str()) || SAFE_DATA_KEYS.contains(&key.as_str()) {
            projected.insert(key.clone(), truncate(value));
        }
    }
    Value::Object(projected)
}

fn truncate(value: &Value) -> Value {
    match value {
        Value::String(text) => {
            if text.chars().count() > MAX_PROJECTED_STRING {
                Value::String(text.chars().take(MAX_PROJECTED_STRING).collect())
            } else {
                value.clone()
            }
        }
        Value::Array(items) => Value::Array(items.iter().take(MAX_PROJECTED_ARRAY).map(truncate).collect()),
        Value::Object(map) => {
            let mut out = JsonMap::new();
            for (key, child) in map {
                out.insert(key.clone(), truncate(child));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
