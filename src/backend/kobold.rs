use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ConnectivityHub, GenerationRequest, TextGenerationBackend};
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Text backend speaking the Kobold-style HTTP API: token counting via
/// `/api/extra/tokencount`, generation via `/api/v1/generate`, abort via
/// `/api/extra/abort`. The link is pre-configured; no authentication.
pub struct KoboldClient {
    base_url: String,
    client: Client,
    hub: ConnectivityHub,
}

impl KoboldClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Connectivity(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            hub: ConnectivityHub::new(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = self.endpoint(path);
        let response = match self.client.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(%url, error = %err, "backend unreachable");
                self.hub.set_connected(false);
                return Err(Error::Connectivity(err.to_string()));
            }
        };
        self.hub.set_connected(true);

        let status = response.status();
        let data = response.json::<Value>().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = extract_error_message(&data)
                .unwrap_or_else(|| format!("backend returned status {}", status.as_u16()));
            return Err(Error::Generation(message));
        }
        Ok(data)
    }
}

#[async_trait]
impl TextGenerationBackend for KoboldClient {
    async fn count_tokens(&self, text: &str) -> Result<usize> {
        let data = self
            .post("/api/extra/tokencount", json!({ "prompt": text }))
            .await?;
        data.get("value")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| Error::Tokenization("token count missing from response".into()))
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        debug!(
            prompt_len = request.text.len(),
            max_length = request.max_length,
            "sending generation request"
        );
        let body = json!({
            "prompt": request.text,
            "max_length": request.max_length,
            "stop_sequence": request.stop_sequences,
            "temperature": request.temperature,
            "top_p": request.top_p,
        });
        let data = self.post("/api/v1/generate", body).await?;
        data.get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|first| first.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Generation("empty response from backend".into()))
    }

    async fn abort(&self) -> Result<()> {
        self.post("/api/extra/abort", json!({})).await?;
        Ok(())
    }

    fn connectivity(&self) -> &ConnectivityHub {
        &self.hub
    }
}

fn extract_error_message(data: &Value) -> Option<String> {
    for key in ["detail", "error", "message"] {
        if let Some(text) = data.get(key).and_then(value_text) {
            return Some(text);
        }
    }
    None
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => map.get("msg").or_else(|| map.get("message")).and_then(value_text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = KoboldClient::new("http://localhost:5000/").unwrap();
        assert_eq!(
            client.endpoint("/api/v1/generate"),
            "http://localhost:5000/api/v1/generate"
        );
    }

    #[test]
    fn error_message_extraction_prefers_detail() {
        let data = json!({ "detail": { "msg": "out of memory" } });
        assert_eq!(extract_error_message(&data).unwrap(), "out of memory");
        let data = json!({ "error": "bad request" });
        assert_eq!(extract_error_message(&data).unwrap(), "bad request");
        assert_eq!(extract_error_message(&json!({})), None);
    }
}
