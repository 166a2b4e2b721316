//! Built-in action implementations served by the plugin loop.

use serde_json::Value;

mod hello;
mod http;
mod shell;

/// Dispatch one action by name.
///
/// Errors are plain strings here; the server loop folds them into the RPC
/// response and the engine re-wraps them as action errors.
pub async fn run(action: &str, args: &[String], with: &Value) -> Result<Value, String> {
    match action {
        "hello" => hello::run(with),
        "shell" => shell::run(with).await,
        "http" => http::run(with).await,
        other => Err(format!("unknown action '{other}' (args: {})", args.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let error = run("nope", &[], &Value::Null).await.expect_err("should fail");
        assert!(error.contains("unknown action 'nope'"));
    }

    #[tokio::test]
    async fn hello_is_dispatchable() {
        let result = run("hello", &[], &json!({})).await.expect("run");
        assert_eq!(result["code"], 0);
    }
}
