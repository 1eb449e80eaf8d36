use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{ImageGenerationBackend, ImagePrompt};
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Image backend speaking the A1111-style web API (`/sdapi/v1/*`). Images
/// cross the wire base64-encoded; this layer hands out raw bytes.
pub struct DiffusionClient {
    base_url: String,
    client: Client,
}

impl DiffusionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Image(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Image(e.to_string()))?;
        let status = response.status();
        let data = response
            .json::<Value>()
            .await
            .map_err(|e| Error::Image(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Image(format!(
                "image backend returned status {}",
                status.as_u16()
            )));
        }
        Ok(data)
    }
}

#[async_trait]
impl ImageGenerationBackend for DiffusionClient {
    async fn interrogate(&self, image: &[u8]) -> Result<String> {
        let encoded = general_purpose::STANDARD.encode(image);
        let data = self
            .post(
                "/sdapi/v1/interrogate",
                json!({ "image": encoded, "model": "clip" }),
            )
            .await?;
        data.get("caption")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Image("interrogation returned no caption".into()))
    }

    async fn generate(&self, prompt: &ImagePrompt) -> Result<Vec<u8>> {
        debug!(steps = prompt.steps, "sending image generation request");
        let full_prompt = if prompt.style.is_empty() {
            prompt.text.clone()
        } else {
            format!("{}, {}", prompt.text, prompt.style)
        };
        let body = json!({
            "prompt": full_prompt,
            "negative_prompt": prompt.negative_text,
            "seed": prompt.seed,
            "steps": prompt.steps,
            "width": prompt.width,
            "height": prompt.height,
        });
        let data = self.post("/sdapi/v1/txt2img", body).await?;
        let encoded = data
            .get("images")
            .and_then(Value::as_array)
            .and_then(|images| images.first())
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Image("image backend returned no image".into()))?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Image(format!("invalid image payload: {}", e)))
    }
}
