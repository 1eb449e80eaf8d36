use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::storage::Storage;

pub const SETTINGS_FILE: &str = "settings.json";

/// Tunables for prompt sizing and generation. The margin, step size and try
/// count are the legacy client's empirically chosen defaults; none of them
/// is a hard invariant, which is why they live here and not in code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub max_context_length: usize,
    pub max_output_tokens: usize,
    /// Tokens reserved for the trailing turn marker when sizing the window.
    #[serde(default = "default_context_margin")]
    pub context_margin: usize,
    /// Route generations through the chunked multi-step loop.
    #[serde(default)]
    pub multi_step: bool,
    #[serde(default = "default_tokens_per_step")]
    pub tokens_per_step: usize,
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    pub temperature: f32,
    pub top_p: f32,
    /// Token budget accumulated when the sliding window start is recomputed.
    #[serde(default = "default_window_buffer")]
    pub window_buffer_tokens: usize,
    /// Instruct-mode turn wrappers; each contains a `{{prompt}}` slot.
    #[serde(default = "default_user_turn")]
    pub user_turn_template: String,
    #[serde(default = "default_model_turn")]
    pub model_turn_template: String,
    #[serde(default)]
    pub image: ImageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSettings {
    pub negative_text: String,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    /// Appended to every image prompt, e.g. an art style suffix.
    pub style: String,
}

fn default_context_margin() -> usize {
    32
}

fn default_tokens_per_step() -> usize {
    64
}

fn default_max_tries() -> u32 {
    3
}

fn default_window_buffer() -> usize {
    512
}

fn default_user_turn() -> String {
    "### Instruction:\n{{prompt}}\n".to_string()
}

fn default_model_turn() -> String {
    "### Response:\n{{prompt}}\n".to_string()
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_context_length: 2048,
            max_output_tokens: 512,
            context_margin: default_context_margin(),
            multi_step: false,
            tokens_per_step: default_tokens_per_step(),
            max_tries: default_max_tries(),
            stop_sequences: Vec::new(),
            temperature: 0.7,
            top_p: 0.9,
            window_buffer_tokens: default_window_buffer(),
            user_turn_template: default_user_turn(),
            model_turn_template: default_model_turn(),
            image: ImageSettings::default(),
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            negative_text: "lowres, bad anatomy, bad hands, text, error".to_string(),
            steps: 20,
            width: 512,
            height: 512,
            style: String::new(),
        }
    }
}

/// Reads settings from storage, seeding the file with defaults on first run.
pub fn load_settings(storage: &dyn Storage) -> Result<GenerationSettings> {
    if let Some(bytes) = storage.read(SETTINGS_FILE)? {
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        let defaults = GenerationSettings::default();
        save_settings(storage, &defaults)?;
        info!("seeded default generation settings");
        Ok(defaults)
    }
}

pub fn save_settings(storage: &dyn Storage, settings: &GenerationSettings) -> Result<()> {
    storage.write(SETTINGS_FILE, &serde_json::to_vec_pretty(settings)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileStorage;

    #[test]
    fn load_seeds_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        let first = load_settings(&storage).unwrap();
        assert_eq!(first, GenerationSettings::default());
        assert!(storage.exists(SETTINGS_FILE).unwrap());

        let second = load_settings(&storage).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn margin_defaults_to_legacy_value() {
        assert_eq!(GenerationSettings::default().context_margin, 32);
    }
}
