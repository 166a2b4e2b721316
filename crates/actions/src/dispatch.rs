//! Out-of-process action dispatcher.
//!
//! Each `run` call spawns the host executable again with the reserved
//! `builtin-actions` argument, verifies the handshake, performs the single
//! RPC over the child's stdio, and tears the child down. The child starts
//! with a scrubbed environment: only a minimal `PATH` and the handshake
//! cookie cross the boundary.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use probe_engine::action::ActionRunner;
use probe_engine::error::ProbeError;
use probe_util::restore_integers;

use crate::protocol::{
    COOKIE_ENV, COOKIE_VALUE, Handshake, PLUGIN_SUBCOMMAND, RunRequest, RunResponse, read_frame, sanitize_for_wire,
    write_frame,
};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(120);

/// Dispatcher that runs actions in child plugin processes.
pub struct PluginDispatcher {
    exe: PathBuf,
    rpc_timeout: Duration,
}

impl PluginDispatcher {
    /// Dispatcher re-invoking the current executable.
    pub fn from_current_exe() -> Result<Self, ProbeError> {
        let exe = std::env::current_exe().map_err(|error| {
            ProbeError::action("dispatch.exe", "cannot resolve the current executable").with_source(error)
        })?;
        Ok(Self::new(exe))
    }

    pub fn new(exe: PathBuf) -> Self {
        Self {
            exe,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    fn build_command(&self, action: &str) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg(PLUGIN_SUBCOMMAND).arg(action);

        // Children start from a clean environment; the cookie is the only
        // probe-specific variable they receive.
        cmd.env_clear();
        #[cfg(unix)]
        cmd.env("PATH", "/usr/bin:/bin");
        #[cfg(windows)]
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        cmd.env(COOKIE_ENV, COOKIE_VALUE);

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        {
            use libc::{getgid, getuid, setgid, setuid};
            unsafe {
                cmd.pre_exec(|| {
                    #[cfg(target_os = "linux")]
                    {
                        use libc::{PR_SET_DUMPABLE, prctl};
                        let _ = prctl(PR_SET_DUMPABLE, 0, 0, 0, 0);
                    }
                    let uid = getuid();
                    let gid = getgid();
                    if setgid(gid) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if setuid(uid) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        cmd
    }
}

#[async_trait]
impl ActionRunner for PluginDispatcher {
    async fn run(
        &self,
        name: &str,
        args: &[String],
        with: &JsonMap<String, Value>,
        verbose: bool,
    ) -> Result<JsonMap<String, Value>, ProbeError> {
        let mut child = self.build_command(name).spawn().map_err(|error| {
            ProbeError::action("dispatch.spawn", "cannot spawn action plugin")
                .with_context("action", name)
                .with_source(error)
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(mut stdin), Some(stdout)) = (stdin, stdout) else {
            let _ = child.kill().await;
            return Err(ProbeError::action("dispatch.pipe", "plugin stdio unavailable").with_context("action", name));
        };

        // Forward plugin diagnostics in verbose mode; drain quietly
        // otherwise so the child never blocks on a full pipe.
        if let Some(stderr) = stderr {
            let action = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if verbose {
                        debug!(action = %action, "{line}");
                    }
                }
            });
        }

        let mut reader = BufReader::new(stdout);
        let outcome = timeout(self.rpc_timeout, async {
            let handshake: Handshake = read_frame(&mut reader)
                .await
                .map_err(|error| {
                    ProbeError::action("dispatch.handshake", "cannot read plugin handshake")
                        .with_context("action", name)
                        .with_source(error)
                })?
                .ok_or_else(|| {
                    ProbeError::action("dispatch.handshake", "plugin exited before handshake").with_context("action", name)
                })?;
            if !handshake.is_compatible() {
                return Err(ProbeError::action("dispatch.handshake", "incompatible plugin handshake")
                    .with_context("action", name)
                    .with_context("protocol", handshake.protocol.to_string())
                    .with_context("cookie", handshake.cookie));
            }

            let mut with_value = Value::Object(with.clone());
            sanitize_for_wire(&mut with_value);
            let request = RunRequest {
                args: args.to_vec(),
                with: with_value,
            };
            write_frame(&mut stdin, &request).await.map_err(|error| {
                ProbeError::action("dispatch.send", "cannot send run request")
                    .with_context("action", name)
                    .with_source(error)
            })?;

            let response: RunResponse = read_frame(&mut reader)
                .await
                .map_err(|error| {
                    ProbeError::action("dispatch.recv", "cannot read run response")
                        .with_context("action", name)
                        .with_source(error)
                })?
                .ok_or_else(|| {
                    ProbeError::action("dispatch.recv", "plugin exited without a response").with_context("action", name)
                })?;
            Ok(response)
        })
        .await;

        let response = match outcome {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ProbeError::action("dispatch.timeout", "action RPC timed out")
                    .with_context("action", name)
                    .with_context("timeout_sec", self.rpc_timeout.as_secs().to_string()));
            }
        };
        let _ = child.kill().await;
        let response = response?;

        if let Some(message) = response.error {
            return Err(ProbeError::action("dispatch.remote", message).with_context("action", name));
        }
        let mut result = response.result.unwrap_or(Value::Object(JsonMap::new()));
        // JSON transit collapses integers to floats; put them back.
        restore_integers(&mut result);
        match result {
            Value::Object(map) => Ok(map),
            other => {
                warn!(action = %name, "plugin returned a non-map result; wrapping");
                let mut wrapped = JsonMap::new();
                wrapped.insert("result".to_string(), other);
                Ok(wrapped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_points_at_the_current_exe_by_default() {
        let dispatcher = PluginDispatcher::from_current_exe().expect("dispatcher");
        assert!(dispatcher.exe.is_absolute());
        assert_eq!(dispatcher.rpc_timeout, DEFAULT_RPC_TIMEOUT);
    }

    #[tokio::test]
    async fn missing_plugin_binary_is_an_action_error() {
        let dispatcher = PluginDispatcher::new(PathBuf::from("/nonexistent/probe-binary"));
        let error = dispatcher
            .run("hello", &[], &JsonMap::new(), false)
            .await
            .expect_err("should fail");
        assert_eq!(error.kind, probe_engine::ErrorKind::Action);
    }
}
