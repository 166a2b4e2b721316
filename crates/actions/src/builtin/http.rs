//! HTTP action: one request per step, result shaped for test expressions.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map as JsonMap, Value, json};

use probe_util::{header_to_string_value, map_to_record, title_case};

const DEFAULT_TIMEOUT_SEC: u64 = 30;

#[derive(Debug, Deserialize)]
struct HttpConfig {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

pub async fn run(with: &Value) -> Result<Value, String> {
    let params = with.as_object().cloned().unwrap_or_default();
    let config: HttpConfig = map_to_record(&params).map_err(|error| error.to_string())?;

    let method = config.method.as_deref().unwrap_or("GET").to_uppercase();
    let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|_| format!("unsupported method '{method}'"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout.unwrap_or(DEFAULT_TIMEOUT_SEC)))
        .build()
        .map_err(|error| format!("cannot build http client: {error}"))?;

    let mut request = client.request(method.clone(), &config.url);
    for (name, value) in &config.headers {
        request = request.header(name, value);
    }
    if let Some(body) = &config.body {
        request = request.body(body.clone());
    }

    let response = request.send().await.map_err(|error| format!("request failed: {error}"))?;
    let status = response.status();

    let mut headers = JsonMap::new();
    for (name, value) in response.headers() {
        let canonical = title_case(name.as_str(), "-");
        let text = value.to_str().unwrap_or_default().to_string();
        match headers.get_mut(&canonical) {
            Some(Value::Array(existing)) => existing.push(Value::String(text)),
            Some(single) => {
                let first = single.clone();
                headers.insert(canonical, Value::Array(vec![first, Value::String(text)]));
            }
            None => {
                headers.insert(canonical, Value::String(text));
            }
        }
    }

    let body = response.text().await.map_err(|error| format!("cannot read response body: {error}"))?;

    let mut result = json!({
        "req": {
            "url": config.url,
            "method": method.as_str(),
        },
        "res": {
            "code": status.as_u16(),
            "status": format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or("")).trim().to_string(),
            "headers": headers,
            "body": body,
        },
        "code": status.as_u16(),
    });
    if let Some(map) = result
        .get_mut("res")
        .and_then(Value::as_object_mut)
    {
        header_to_string_value(map);
    }
    Ok(result)
}
