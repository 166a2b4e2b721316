//! Wire protocol between the engine and action plugin processes.
//!
//! The transport is line-framed JSON over the child's stdio. The server
//! greets with a [`Handshake`] carrying the protocol version and cookie;
//! after verification the client sends [`RunRequest`] frames and reads one
//! [`RunResponse`] per request. A single RPC method exists: `run`.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Protocol version spoken by both sides.
pub const PROTOCOL_VERSION: u32 = 1;

/// Handshake cookie key.
pub const COOKIE_KEY: &str = "probe";

/// Handshake cookie value.
pub const COOKIE_VALUE: &str = "actions";

/// Environment variable carrying the cookie into the child process.
pub const COOKIE_ENV: &str = "PROBE_PLUGIN_COOKIE";

/// Reserved first argument that switches the executable into plugin mode.
pub const PLUGIN_SUBCOMMAND: &str = "builtin-actions";

/// Greeting frame written by the plugin server on startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: u32,
    /// `"<key>=<value>"`, i.e. `probe=actions`.
    pub cookie: String,
}

impl Handshake {
    pub fn current() -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            cookie: format!("{COOKIE_KEY}={COOKIE_VALUE}"),
        }
    }

    /// True when the peer speaks our protocol and carries our cookie.
    pub fn is_compatible(&self) -> bool {
        self == &Self::current()
    }
}

/// The single RPC request: positional args plus the rendered `with` tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub with: Value,
}

/// The single RPC response: a result tree or an error message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Write one frame: compact JSON followed by a newline.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame).map_err(std::io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Read one frame; `None` on a cleanly closed stream.
pub async fn read_frame<R, T>(reader: &mut BufReader<R>) -> std::io::Result<Option<T>>
where
    R: tokio::io::AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        return serde_json::from_str(line.trim())
            .map(Some)
            .map_err(std::io::Error::other);
    }
}

/// Canonicalise a value tree for the wire.
///
/// Non-finite numbers have no JSON form and become null; everything else is
/// already wire-compatible (durations and timestamps are rendered to
/// strings before they reach the protocol layer).
pub fn sanitize_for_wire(value: &mut Value) {
    match value {
        Value::Number(number) => {
            if number.as_f64().is_some_and(|f| !f.is_finite()) {
                *value = Value::Null;
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize_for_wire(item);
            }
        }
        Value::Object(map) => {
            for (_, child) in map.iter_mut() {
                sanitize_for_wire(child);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, mut server_write) = tokio::io::split(server);
        let (client_read, _client_write) = tokio::io::split(client);

        write_frame(&mut server_write, &Handshake::current()).await.expect("write");
        write_frame(
            &mut server_write,
            &RunResponse {
                result: Some(json!({"code": 0})),
                error: None,
            },
        )
        .await
        .expect("write");

        let mut reader = BufReader::new(client_read);
        let handshake: Handshake = read_frame(&mut reader).await.expect("read").expect("frame");
        assert!(handshake.is_compatible());

        let response: RunResponse = read_frame(&mut reader).await.expect("read").expect("frame");
        assert_eq!(response.result, Some(json!({"code": 0})));
    }

    #[tokio::test]
    async fn closed_stream_reads_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let (client_read, _w) = tokio::io::split(client);
        let mut reader = BufReader::new(client_read);
        let frame: Option<RunResponse> = read_frame(&mut reader).await.expect("read");
        assert!(frame.is_none());
    }

    #[test]
    fn incompatible_handshakes_are_detected() {
        let stale = Handshake {
            protocol: 0,
            cookie: format!("{COOKIE_KEY}={COOKIE_VALUE}"),
        };
        assert!(!stale.is_compatible());

        let wrong_cookie = Handshake {
            protocol: PROTOCOL_VERSION,
            cookie: "probe=other".to_string(),
        };
        assert!(!wrong_cookie.is_compatible());
    }

    #[test]
    fn wire_sanitisation_nulls_non_finite_numbers() {
        let mut value = json!({"ok": 1.5, "items": [2]});
        // Build a non-finite number through the Number API is not possible
        // from JSON text; emulate by checking the pass leaves normal data
        // untouched.
        sanitize_for_wire(&mut value);
        assert_eq!(value, json!({"ok": 1.5, "items": [2]}));
    }
}
