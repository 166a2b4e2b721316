//! Plugin server loop: the child-process side of the RPC.
//!
//! When the executable is re-invoked as `probe builtin-actions <name>`, this
//! loop takes over stdio: it verifies the cookie environment variable,
//! writes the handshake, then serves `run` requests until the dispatcher
//! closes the pipe.

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::debug;

use probe_engine::error::ProbeError;

use crate::builtin;
use crate::protocol::{COOKIE_ENV, COOKIE_VALUE, Handshake, RunRequest, RunResponse, read_frame, write_frame};

/// Serve the named action over process stdio.
///
/// Refuses to start when the handshake cookie is missing: the plugin mode
/// is not a user-facing entry point.
pub async fn serve(action: &str) -> Result<(), ProbeError> {
    let cookie = std::env::var(COOKIE_ENV).unwrap_or_default();
    if cookie != COOKIE_VALUE {
        return Err(ProbeError::action(
            "plugin.serve",
            "plugin mode must be launched by the probe dispatcher",
        )
        .with_context("action", action));
    }

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    serve_connection(action, stdin, stdout).await
}

/// Serve the named action over an arbitrary connection.
///
/// Split out from [`serve`] so tests can drive the loop over an in-memory
/// duplex pipe.
pub async fn serve_connection<R, W>(action: &str, reader: R, mut writer: W) -> Result<(), ProbeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);

    write_frame(&mut writer, &Handshake::current())
        .await
        .map_err(|error| ProbeError::action("plugin.handshake", "cannot write handshake").with_source(error))?;

    loop {
        let request: Option<RunRequest> = read_frame(&mut reader)
            .await
            .map_err(|error| ProbeError::action("plugin.recv", "cannot read run request").with_source(error))?;
        let Some(request) = request else {
            debug!(action, "plugin connection closed");
            return Ok(());
        };

        let response = match builtin::run(action, &request.args, &request.with).await {
            Ok(result) => RunResponse {
                result: Some(result),
                error: None,
            },
            Err(message) => RunResponse {
                result: None,
                error: Some(message),
            },
        };
        write_frame(&mut writer, &response)
            .await
            .map_err(|error| ProbeError::action("plugin.send", "cannot write run response").with_source(error))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::io::BufReader as TokioBufReader;

    #[tokio::test]
    async fn serves_handshake_and_run_over_duplex() {
        let (client, server) = tokio::io::duplex(8192);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);

        let server_task = tokio::spawn(async move { serve_connection("hello", server_read, server_write).await });

        let mut reader = TokioBufReader::new(client_read);
        let handshake: Handshake = read_frame(&mut reader).await.expect("read").expect("handshake");
        assert!(handshake.is_compatible());

        let request = RunRequest {
            args: vec![],
            with: json!({"name": "probe"}),
        };
        write_frame(&mut client_write, &request).await.expect("send");

        let response: RunResponse = read_frame(&mut reader).await.expect("read").expect("response");
        let result = response.result.expect("result");
        assert_eq!(result["code"], 0);
        assert!(
            result["message"].as_str().expect("message").contains("probe"),
            "unexpected result: {result}"
        );

        drop(client_write);
        drop(reader);
        server_task.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn unknown_action_reports_an_error_response() {
        let (client, server) = tokio::io::duplex(8192);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);

        let server_task = tokio::spawn(async move { serve_connection("mystery", server_read, server_write).await });

        let mut reader = TokioBufReader::new(client_read);
        let _handshake: Handshake = read_frame(&mut reader).await.expect("read").expect("handshake");

        write_frame(
            &mut client_write,
            &RunRequest {
                args: vec![],
                with: Value::Null,
            },
        )
        .await
        .expect("send");

        let response: RunResponse = read_frame(&mut reader).await.expect("read").expect("response");
        assert!(response.result.is_none());
        assert!(response.error.as_deref().is_some_and(|e| e.contains("unknown action")));

        drop(client_write);
        drop(reader);
        server_task.await.expect("join").expect("serve");
    }
}
