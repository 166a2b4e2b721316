//! Smoke-test action: greets and returns code 0.

use serde::Deserialize;
use serde_json::{Value, json};

use probe_util::map_to_record;

#[derive(Debug, Deserialize)]
struct HelloConfig {
    #[serde(default)]
    name: Option<String>,
}

pub fn run(with: &Value) -> Result<Value, String> {
    let params = with.as_object().cloned().unwrap_or_default();
    let config: HelloConfig = map_to_record(&params).map_err(|error| error.to_string())?;
    let name = config.name.unwrap_or_else(|| "world".to_string());
    Ok(json!({
        "message": format!("hello, {name}"),
        "code": 0,
    }))
}
