//! Shell action: runs a command line and captures its output.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;
use tokio::time::timeout;

use probe_util::map_to_record;

const DEFAULT_TIMEOUT_SEC: u64 = 30;

#[derive(Debug, Deserialize)]
struct ShellConfig {
    cmd: String,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

pub async fn run(with: &Value) -> Result<Value, String> {
    let params = with.as_object().cloned().unwrap_or_default();
    let config: ShellConfig = map_to_record(&params).map_err(|error| error.to_string())?;

    let mut command = Command::new("sh");
    command.arg("-c").arg(&config.cmd);
    for (key, value) in &config.env {
        command.env(key, value);
    }
    if let Some(workdir) = &config.workdir {
        command.current_dir(workdir);
    }
    command.kill_on_drop(true);

    let budget = Duration::from_secs(config.timeout.unwrap_or(DEFAULT_TIMEOUT_SEC));
    let output = timeout(budget, command.output())
        .await
        .map_err(|_| format!("command timed out after {}s", budget.as_secs()))?
        .map_err(|error| format!("cannot run command: {error}"))?;

    Ok(json!({
        "code": output.status.code().unwrap_or(-1),
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let result = run(&json!({"cmd": "printf ok"})).await.expect("run");
        assert_eq!(result["code"], 0);
        assert_eq!(result["stdout"], "ok");
    }

    #[tokio::test]
    async fn nonzero_exit_codes_are_reported_not_errored() {
        let result = run(&json!({"cmd": "exit 3"})).await.expect("run");
        assert_eq!(result["code"], 3);
    }

    #[tokio::test]
    async fn missing_cmd_is_a_binding_error() {
        let error = run(&json!({"timeout": 1})).await.expect_err("should fail");
        assert!(error.contains("cmd"), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn env_and_workdir_are_applied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = run(&json!({
            "cmd": "printf '%s' \"$GREETING in $(pwd)\"",
            "env": {"GREETING": "hi"},
            "workdir": dir.path().to_str().expect("utf8 path"),
        }))
        .await
        .expect("run");

        let stdout = result["stdout"].as_str().expect("stdout");
        assert!(stdout.starts_with("hi in "), "unexpected stdout: {stdout}");
    }
}
