pub mod diffusion;
pub mod kobold;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One text-generation call: the assembled prompt plus sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub text: String,
    pub max_length: usize,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    pub temperature: f32,
    pub top_p: f32,
}

/// One image-generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrompt {
    pub text: String,
    pub negative_text: String,
    pub seed: i64,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    /// Style suffix appended to `text` by the client.
    pub style: String,
}

#[async_trait]
pub trait TextGenerationBackend: Send + Sync {
    async fn count_tokens(&self, text: &str) -> Result<usize>;
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
    /// Best-effort cancellation of the in-flight call, the only
    /// cancellation primitive this layer models.
    async fn abort(&self) -> Result<()>;
    fn connectivity(&self) -> &ConnectivityHub;
}

#[async_trait]
pub trait ImageGenerationBackend: Send + Sync {
    async fn interrogate(&self, image: &[u8]) -> Result<String>;
    async fn generate(&self, prompt: &ImagePrompt) -> Result<Vec<u8>>;
}

type ConnectivityCallback = Arc<dyn Fn(bool) + Send + Sync + 'static>;

struct HubInner {
    connected: bool,
    listeners: HashMap<String, ConnectivityCallback>,
}

/// Observable backend connection state. Listeners register under a
/// caller-chosen id and must unregister themselves; callbacks fire only on
/// state changes.
#[derive(Clone)]
pub struct ConnectivityHub {
    inner: Arc<Mutex<HubInner>>,
}

impl ConnectivityHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                connected: false,
                listeners: HashMap::new(),
            })),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().map(|i| i.connected).unwrap_or(false)
    }

    pub fn register(&self, id: impl Into<String>, callback: impl Fn(bool) + Send + Sync + 'static) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.listeners.insert(id.into(), Arc::new(callback));
        }
    }

    pub fn unregister(&self, id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.listeners.remove(id);
        }
    }

    pub fn set_connected(&self, connected: bool) {
        // State flips under the lock; callbacks run outside it so a
        // listener may call back into the hub.
        let callbacks: Vec<ConnectivityCallback> = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if inner.connected == connected {
                return;
            }
            inner.connected = connected;
            inner.listeners.values().cloned().collect()
        };
        for callback in callbacks {
            callback(connected);
        }
    }
}

impl Default for ConnectivityHub {
    fn default() -> Self {
        Self::new()
    }
}
