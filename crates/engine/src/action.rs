//! The action capability consumed by the step executor.
//!
//! The engine never runs actions itself; it speaks to an [`ActionRunner`],
//! normally the out-of-process plugin dispatcher from `probe-actions`. Tests
//! substitute [`MockRunner`] with canned or computed results.

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value};

use crate::error::ProbeError;

/// Uniform interface over action execution.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Run the named action with positional `args` and the rendered `with`
    /// tree, returning the action's result map.
    async fn run(
        &self,
        name: &str,
        args: &[String],
        with: &JsonMap<String, Value>,
        verbose: bool,
    ) -> Result<JsonMap<String, Value>, ProbeError>;
}

type MockHandler = dyn Fn(&str, &JsonMap<String, Value>) -> Result<JsonMap<String, Value>, ProbeError> + Send + Sync;

/// Scriptable in-process runner for tests.
///
/// Responds from a handler closure when one is installed, otherwise echoes
/// the request back with a zero exit code.
#[derive(Default)]
pub struct MockRunner {
    handler: Option<Box<MockHandler>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler receiving `(action_name, with)`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str, &JsonMap<String, Value>) -> Result<JsonMap<String, Value>, ProbeError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
        }
    }

    /// Runner that always answers with the same result map.
    pub fn fixed(result: JsonMap<String, Value>) -> Self {
        Self::with_handler(move |_, _| Ok(result.clone()))
    }
}

#[async_trait]
impl ActionRunner for MockRunner {
    async fn run(
        &self,
        name: &str,
        _args: &[String],
        with: &JsonMap<String, Value>,
        _verbose: bool,
    ) -> Result<JsonMap<String, Value>, ProbeError> {
        match &self.handler {
            Some(handler) => handler(name, with),
            None => {
                let mut echo = JsonMap::new();
                echo.insert("action".to_string(), Value::String(name.to_string()));
                echo.insert("with".to_string(), Value::Object(with.clone()));
                echo.insert("code".to_string(), Value::Number(0.into()));
                Ok(echo)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn default_mock_echoes_the_request() {
        let runner = MockRunner::new();
        let with = json!({"name": "world"}).as_object().expect("object").clone();

        let result = runner.run("hello", &[], &with, false).await.expect("run");

        assert_eq!(result["action"], "hello");
        assert_eq!(result["with"]["name"], "world");
        assert_eq!(result["code"], 0);
    }

    #[tokio::test]
    async fn handler_decides_per_action() {
        let runner = MockRunner::with_handler(|name, _| {
            if name == "boom" {
                Err(ProbeError::action("mock.run", "exploded"))
            } else {
                Ok(json!({"code": 0}).as_object().expect("object").clone())
            }
        });

        assert!(runner.run("ok", &[], &JsonMap::new(), false).await.is_ok());
        assert!(runner.run("boom", &[], &JsonMap::new(), false).await.is_err());
    }
}
