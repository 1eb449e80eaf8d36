use std::sync::Arc;

use crate::backend::TextGenerationBackend;
use crate::error::{Error, Result};

/// Token-counting front over the text backend. Counting is a hard
/// dependency of prompt sizing: any failure here aborts the build.
#[derive(Clone)]
pub struct Tokenizer {
    backend: Arc<dyn TextGenerationBackend>,
}

impl Tokenizer {
    pub fn new(backend: Arc<dyn TextGenerationBackend>) -> Self {
        Self { backend }
    }

    /// Counts tokens in `text`. Empty text is always 0, without a network
    /// call.
    pub async fn count(&self, text: &str) -> Result<usize> {
        if text.trim().is_empty() {
            return Ok(0);
        }
        self.backend
            .count_tokens(text)
            .await
            .map_err(|e| Error::Tokenization(e.to_string()))
    }
}
