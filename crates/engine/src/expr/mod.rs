//! Expression evaluation and `{…}` template rendering.
//!
//! Expressions evaluate against a JSON environment built from the step
//! context (`vars`, `logs`, `outputs`, `res`, `rt`, `env`, `iter`). Every
//! evaluation passes through the security layer first: raw-text screening,
//! environment projection, and a wall-clock deadline enforced inside the
//! evaluation loop.

use std::time::Instant;

use serde_json::Value;

use crate::error::ProbeError;

pub mod functions;
pub mod parser;
pub mod security;
mod template;

pub use security::SecurityMode;
pub use template::Rendered;

use parser::{BinOp, Expr, PathSeg, UnaryOp};

/// Expression evaluator with a configured security mode.
///
/// Cheap to copy; one lives in every job context.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    pub mode: SecurityMode,
}

impl Evaluator {
    pub fn new(mode: SecurityMode) -> Self {
        Self { mode }
    }

    /// Evaluate an expression to a value.
    pub fn eval(&self, expression: &str, env: &Value) -> Result<Value, ProbeError> {
        security::check_expression(expression).map_err(|error| self.enforce(error))?;
        let projected = security::sanitize_env(env);
        let ast = parser::parse(expression).map_err(|message| {
            ProbeError::validation("expr.parse", message).with_context("expression", short(expression))
        })?;
        let deadline = Instant::now() + security::EVAL_TIMEOUT;
        eval_ast(&ast, &projected, deadline).map_err(|error| self.enforce(error.into_probe(expression)))
    }

    /// Evaluate an expression that must produce a boolean.
    pub fn eval_bool(&self, expression: &str, env: &Value) -> Result<bool, ProbeError> {
        match self.eval(expression, env)? {
            Value::Bool(flag) => Ok(flag),
            other => Err(ProbeError::execution("expr.eval", "expression did not evaluate to a boolean")
                .with_context("expression", short(expression))
                .with_context("value", value_to_display(&other))),
        }
    }

    /// Replace every `{…}` segment of `input` with its evaluated text.
    ///
    /// Strict form: the first failing segment aborts the render. Inputs
    /// without any template segment are returned unchanged.
    pub fn eval_template(&self, input: &str, env: &Value) -> Result<String, ProbeError> {
        let rendered = template::render(self, input, env);
        match rendered.issues.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(rendered.text),
        }
    }

    /// Lenient template render used for `with` trees and step names.
    ///
    /// Security violations render as `[SecurityError: …]` tokens and are
    /// reported in [`Rendered::issues`] so the step executor can fail the
    /// step; other evaluation problems leave the segment text untouched.
    pub fn render_template(&self, input: &str, env: &Value) -> Rendered {
        template::render(self, input, env)
    }

    /// Recursively render the string leaves of a mapping.
    ///
    /// Non-string leaves pass through; nested maps and arrays recurse. All
    /// issues from all leaves are collected.
    pub fn eval_template_map(
        &self,
        map: &serde_json::Map<String, Value>,
        env: &Value,
    ) -> (serde_json::Map<String, Value>, Vec<ProbeError>) {
        template::render_map(self, map, env)
    }

    /// Apply the configured security mode to a security-kind error.
    fn enforce(&self, error: ProbeError) -> ProbeError {
        if error.is_security() && self.mode == SecurityMode::HardExit {
            eprintln!("fatal: {error}");
            std::process::exit(2);
        }
        error
    }
}

/// Render a value the way templates and the report show it: bare strings,
/// canonical numbers, `<nil>` for missing data, compact JSON for structures.
pub fn value_to_display(value: &Value) -> String {
    match value {
        Value::Null => "<nil>".to_string(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                int.to_string()
            } else {
                number.to_string()
            }
        }
        other => other.to_string(),
    }
}

fn short(expression: &str) -> String {
    const LIMIT: usize = 120;
    if expression.chars().count() > LIMIT {
        let mut clipped: String = expression.chars().take(LIMIT).collect();
        clipped.push('…');
        clipped
    } else {
        expression.to_string()
    }
}

enum EvalError {
    Security(String),
    Eval(String),
}

impl EvalError {
    fn into_probe(self, expression: &str) -> ProbeError {
        match self {
            EvalError::Security(message) => {
                ProbeError::security("expr.eval", message).with_context("expression", short(expression))
            }
            EvalError::Eval(message) => {
                ProbeError::execution("expr.eval", message).with_context("expression", short(expression))
            }
        }
    }
}

fn eval_ast(expr: &Expr, env: &Value, deadline: Instant) -> Result<Value, EvalError> {
    if Instant::now() > deadline {
        return Err(EvalError::Security("expression evaluation timed out".to_string()));
    }

    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(resolve_path(env, segments)),
        Expr::Unary(UnaryOp::Not, inner) => match eval_ast(inner, env, deadline)? {
            Value::Bool(flag) => Ok(Value::Bool(!flag)),
            other => Err(EvalError::Eval(format!("'!' expects a boolean, got {}", type_name(&other)))),
        },
        Expr::Unary(UnaryOp::Neg, inner) => {
            let value = eval_ast(inner, env, deadline)?;
            let number = value
                .as_f64()
                .ok_or_else(|| EvalError::Eval(format!("'-' expects a number, got {}", type_name(&value))))?;
            serde_json::Number::from_f64(-number)
                .map(Value::Number)
                .ok_or_else(|| EvalError::Eval("negation produced a non-finite number".to_string()))
        }
        Expr::Binary(BinOp::And, left, right) => {
            if !expect_bool(eval_ast(left, env, deadline)?, "&&")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(expect_bool(eval_ast(right, env, deadline)?, "&&")?))
        }
        Expr::Binary(BinOp::Or, left, right) => {
            if expect_bool(eval_ast(left, env, deadline)?, "||")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(expect_bool(eval_ast(right, env, deadline)?, "||")?))
        }
        Expr::Binary(op, left, right) => {
            let left_value = eval_ast(left, env, deadline)?;
            let right_value = eval_ast(right, env, deadline)?;
            match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                    arithmetic(*op, &left_value, &right_value)
                }
                _ => compare(*op, &left_value, &right_value).map(Value::Bool),
            }
        }
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_ast(arg, env, deadline)?);
            }
            call_function(name, &values)
        }
    }
}

fn call_function(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "match_json" => {
            let (a, b) = two_args(name, args)?;
            functions::match_json(a, b).map(Value::Bool).map_err(EvalError::Eval)
        }
        "diff_json" => {
            let (a, b) = two_args(name, args)?;
            functions::diff_json(a, b).map(Value::String).map_err(EvalError::Eval)
        }
        other => Err(EvalError::Security(format!("unknown function '{other}'"))),
    }
}

fn two_args<'a>(name: &str, args: &'a [Value]) -> Result<(&'a Value, &'a Value), EvalError> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(EvalError::Eval(format!("{name} requires exactly two arguments"))),
    }
}

fn expect_bool(value: Value, op: &str) -> Result<bool, EvalError> {
    match value {
        Value::Bool(flag) => Ok(flag),
        other => Err(EvalError::Eval(format!("'{op}' expects booleans, got {}", type_name(&other)))),
    }
}

/// Numeric arithmetic, plus `+` as string concatenation.
///
/// Whole results are folded back to integers so `4 / 2` reads as `2`, not
/// `2.0`, in templates and diffs.
fn arithmetic(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if op == BinOp::Add
        && let (Value::String(a), Value::String(b)) = (left, right)
    {
        return Ok(Value::String(format!("{a}{b}")));
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(EvalError::Eval(format!(
            "arithmetic requires numbers, got {} and {}",
            type_name(left),
            type_name(right)
        )));
    };
    if matches!(op, BinOp::Div | BinOp::Mod) && b == 0.0 {
        return Err(EvalError::Eval("division by zero".to_string()));
    }

    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a % b,
        _ => unreachable!("non-arithmetic op"),
    };
    if !result.is_finite() {
        return Err(EvalError::Eval("arithmetic produced a non-finite number".to_string()));
    }
    if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        return Ok(Value::Number((result as i64).into()));
    }
    serde_json::Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| EvalError::Eval("arithmetic produced a non-finite number".to_string()))
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    match op {
        BinOp::Eq => Ok(loose_eq(left, right)),
        BinOp::Ne => Ok(!loose_eq(left, right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
                a.partial_cmp(&b)
                    .ok_or_else(|| EvalError::Eval("cannot order non-finite numbers".to_string()))?
            } else if let (Value::String(a), Value::String(b)) = (left, right) {
                a.cmp(b)
            } else {
                return Err(EvalError::Eval(format!(
                    "cannot order {} against {}",
                    type_name(left),
                    type_name(right)
                )));
            };
            Ok(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            })
        }
        BinOp::And | BinOp::Or => unreachable!("boolean composition is handled before compare"),
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            unreachable!("arithmetic ops are handled before compare")
        }
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a == b;
    }
    left == right
}

fn resolve_path(env: &Value, segments: &[PathSeg]) -> Value {
    let mut current = env;
    for segment in segments {
        match (segment, current) {
            (PathSeg::Key(key), Value::Object(map)) => match map.get(key) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            (PathSeg::Index(index), Value::Array(items)) => match items.get(*index) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> Value {
        json!({
            "vars": {"region": "us", "limit": 3},
            "res": {"code": 200, "body": {"token": "abc", "ok": true}},
            "rt": {"duration": "120ms", "sec": 0.12},
            "logs": [{"res": {"code": 201}}],
            "outputs": {"token": "abc"},
            "env": {"REGION": "us-east-1"}
        })
    }

    #[test]
    fn evaluates_paths_and_comparisons() {
        let evaluator = Evaluator::default();
        assert_eq!(evaluator.eval("res.code", &env()).expect("eval"), json!(200));
        assert_eq!(evaluator.eval("res.code == 200", &env()).expect("eval"), json!(true));
        assert_eq!(evaluator.eval("rt.sec < 1", &env()).expect("eval"), json!(true));
        assert_eq!(evaluator.eval("logs[0].res.code", &env()).expect("eval"), json!(201));
    }

    #[test]
    fn missing_paths_resolve_to_null() {
        let evaluator = Evaluator::default();
        assert_eq!(evaluator.eval("res.body.absent", &env()).expect("eval"), Value::Null);
        assert_eq!(
            evaluator.eval("res.body.absent == null", &env()).expect("eval"),
            json!(true)
        );
    }

    #[test]
    fn boolean_composition_short_circuits() {
        let evaluator = Evaluator::default();
        assert_eq!(
            evaluator
                .eval("res.code == 200 && res.body.ok", &env())
                .expect("eval"),
            json!(true)
        );
        // Right side would be a type error, but the left decides first.
        assert_eq!(
            evaluator.eval("res.code == 200 || res.code", &env()).expect("eval"),
            json!(true)
        );
    }

    #[test]
    fn numbers_compare_across_int_and_float() {
        let evaluator = Evaluator::default();
        assert_eq!(evaluator.eval("vars.limit == 3.0", &env()).expect("eval"), json!(true));
    }

    #[test]
    fn arithmetic_composes_with_comparisons() {
        let evaluator = Evaluator::default();
        assert_eq!(
            evaluator.eval("rt.sec * 1000 < 500", &env()).expect("eval"),
            json!(true)
        );
        assert_eq!(evaluator.eval("vars.limit + 1", &env()).expect("eval"), json!(4));
        assert_eq!(evaluator.eval("10 / 4", &env()).expect("eval"), json!(2.5));
        assert_eq!(evaluator.eval("10 % 3", &env()).expect("eval"), json!(1));
    }

    #[test]
    fn plus_concatenates_strings() {
        let evaluator = Evaluator::default();
        assert_eq!(
            evaluator.eval("vars.region + \"-east\"", &env()).expect("eval"),
            json!("us-east")
        );
    }

    #[test]
    fn division_by_zero_is_an_evaluation_error() {
        let evaluator = Evaluator::default();
        let error = evaluator.eval("1 / 0", &env()).expect_err("should fail");
        assert!(error.to_string().contains("division by zero"));
    }

    #[test]
    fn eval_bool_rejects_non_boolean_results() {
        let evaluator = Evaluator::default();
        let error = evaluator.eval_bool("res.code", &env()).expect_err("should fail");
        assert!(error.to_string().contains("did not evaluate to a boolean"));
    }

    #[test]
    fn registered_functions_are_callable() {
        let evaluator = Evaluator::default();
        let env = json!({
            "res": {"body": {"token": "abc", "code": 200}},
            "vars": {"expect": {"token": "/^a/"}}
        });
        assert_eq!(
            evaluator.eval("match_json(res.body, vars.expect)", &env).expect("eval"),
            json!(true)
        );
    }

    #[test]
    fn unknown_functions_are_security_errors() {
        let evaluator = Evaluator::default();
        let error = evaluator.eval("mystery(res)", &env()).expect_err("should fail");
        assert!(error.is_security());
    }

    #[test]
    fn banned_env_access_is_refused() {
        let evaluator = Evaluator::default();
        let error = evaluator.eval("env.DB_PASSWORD", &env()).expect_err("should fail");
        assert!(error.is_security());
    }

    #[test]
    fn over_length_expression_is_refused() {
        let evaluator = Evaluator::default();
        let expression = format!("res.code == {}", "1".repeat(1001));
        let error = evaluator.eval(&expression, &env()).expect_err("should fail");
        assert!(error.is_security());
    }
}
