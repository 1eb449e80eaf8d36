use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::budget::generate_stepwise;
use super::prompt::{BuiltPrompt, PromptBuilder, PromptConfig};
use super::store::ChatStore;
use super::types::{Character, Chat, Message};
use super::window::ContextWindowState;
use crate::backend::{ImageGenerationBackend, ImagePrompt, TextGenerationBackend};
use crate::error::{Error, Result};
use crate::settings::GenerationSettings;
use crate::tokenizer::Tokenizer;

/// Shown in the active swipe while its text is being generated.
const GENERATING_PLACEHOLDER: &str = "…";
/// Appended to the visible content while a continuation is in flight.
const CONTINUE_MARKER: &str = " …";

/// Result of one successful generation workflow. An image failure never
/// rolls back committed text, so it travels here instead of as an error.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub text: String,
    pub image_error: Option<String>,
}

/// Clears the single-flight flag on every exit path, panics included.
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives the five generation workflows for one open chat. One generator
/// owns one chat; independent generators are fully independent.
pub struct ConversationGenerator {
    backend: Arc<dyn TextGenerationBackend>,
    image_backend: Option<Arc<dyn ImageGenerationBackend>>,
    store: Arc<ChatStore>,
    builder: PromptBuilder,
    settings: GenerationSettings,
    character: Character,
    user_name: String,
    chat: Chat,
    window: ContextWindowState,
    is_generating: Arc<AtomicBool>,
}

impl ConversationGenerator {
    pub fn new(
        backend: Arc<dyn TextGenerationBackend>,
        image_backend: Option<Arc<dyn ImageGenerationBackend>>,
        store: Arc<ChatStore>,
        settings: GenerationSettings,
        character: Character,
        chat: Chat,
        user_name: impl Into<String>,
    ) -> Self {
        let builder = PromptBuilder::new(Tokenizer::new(backend.clone()), settings.clone());
        Self {
            backend,
            image_backend,
            store,
            builder,
            settings,
            character,
            user_name: user_name.into(),
            chat,
            window: ContextWindowState::default(),
            is_generating: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<FlightGuard> {
        self.is_generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::Busy)?;
        Ok(FlightGuard(self.is_generating.clone()))
    }

    fn base_config(&self) -> PromptConfig {
        PromptConfig::default().with_first_message_index(self.window.start_index())
    }

    async fn build_prompt(&mut self, config: &PromptConfig) -> Result<BuiltPrompt> {
        let built = self
            .builder
            .build(config, &self.character, &self.chat, &self.user_name)
            .await?;
        if built.first_message_index > self.window.start_index() {
            self.builder
                .advance_window(
                    config,
                    &self.chat,
                    &self.character,
                    &self.user_name,
                    &mut self.window,
                    built.first_message_index,
                )
                .await?;
        }
        Ok(built)
    }

    async fn run_generation(&self, prompt: &BuiltPrompt) -> Result<String> {
        let request = prompt.to_request();
        let text = if self.settings.multi_step {
            generate_stepwise(self.backend.as_ref(), &request, &self.settings).await?
        } else {
            self.backend.generate(&request).await?
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Generation("backend produced no text".into()));
        }
        Ok(trimmed.to_string())
    }

    /// Appends a user turn (when there is input and the last turn is not
    /// already the user's) and generates the character's reply. On failure
    /// every speculative message is removed again.
    pub async fn generate_new_message(
        &mut self,
        user_text: Option<String>,
        user_image: Option<Vec<u8>>,
        with_image: bool,
    ) -> Result<GenerationOutcome> {
        let _flight = self.begin()?;
        let checkpoint = self.chat.messages.len();
        let mut image_error = None;

        let has_input =
            user_text.as_deref().is_some_and(|t| !t.trim().is_empty()) || user_image.is_some();
        let last_is_user = self.chat.last_message().map(|m| m.is_user).unwrap_or(false);
        if has_input && !last_is_user {
            let mut text = user_text.unwrap_or_default().trim().to_string();
            if let Some(image) = user_image {
                match self.describe_image(&image).await {
                    Ok(caption) => {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(&format!("*{}*", caption));
                    }
                    Err(err) => {
                        warn!(%err, "image interrogation failed");
                        image_error = Some(err.to_string());
                    }
                }
            }
            self.chat
                .messages
                .push(Message::new(self.user_name.clone(), true, text));
        }

        // The prompt is built before the placeholder exists, so the pending
        // turn never reaches the backend.
        let config = self.base_config();
        let prompt = match self.build_prompt(&config).await {
            Ok(prompt) => prompt,
            Err(err) => {
                self.chat.messages.truncate(checkpoint);
                return Err(err);
            }
        };

        self.chat.messages.push(Message::new(
            self.character.name.clone(),
            false,
            GENERATING_PLACEHOLDER,
        ));

        let text = match self.run_generation(&prompt).await {
            Ok(text) => text,
            Err(err) => {
                // Speculative turns vanish; the chat looks untouched.
                self.chat.messages.truncate(checkpoint);
                return Err(err);
            }
        };

        if let Some(last) = self.chat.last_message_mut() {
            last.set_content(text.clone());
            last.send_date = crate::utils::now_millis();
        }
        self.freeze_earlier_messages()?;
        self.store.save(&self.chat)?;
        info!(messages = self.chat.messages.len(), "new message generated");

        if with_image {
            image_error = self.attach_image(&text).await.or(image_error);
        }
        Ok(GenerationOutcome { text, image_error })
    }

    /// Suggests the user's next message from the existing history. Never
    /// mutates the chat, success or failure.
    pub async fn generate_user_message(&mut self, draft: &str) -> Result<String> {
        let _flight = self.begin()?;
        let config = self.base_config().for_user();
        let mut prompt = self.build_prompt(&config).await?;
        if !draft.trim().is_empty() {
            prompt.text.push_str(draft.trim_start());
        }
        self.run_generation(&prompt).await
    }

    /// Continues the last message's active swipe in place.
    pub async fn complete_message(&mut self, with_image: bool) -> Result<GenerationOutcome> {
        let _flight = self.begin()?;
        let original = self
            .chat
            .last_message()
            .map(|m| m.content().to_string())
            .ok_or_else(|| Error::InvalidChat("chat has no messages".into()))?;

        // The prompt is sized against the original content; the marker is
        // only visible state while the call is in flight.
        let config = self.base_config().complete();
        let prompt = self.build_prompt(&config).await?;

        if let Some(last) = self.chat.last_message_mut() {
            last.set_content(format!("{}{}", original, CONTINUE_MARKER));
        }

        match self.run_generation(&prompt).await {
            Ok(text) => {
                let combined = join_continuation(&original, &text);
                if let Some(last) = self.chat.last_message_mut() {
                    last.set_content(combined.clone());
                }
                self.store.save(&self.chat)?;
                let image_error = if with_image {
                    self.attach_image(&combined).await
                } else {
                    None
                };
                Ok(GenerationOutcome {
                    text: combined,
                    image_error,
                })
            }
            Err(err) => {
                if let Some(last) = self.chat.last_message_mut() {
                    last.set_content(original);
                }
                Err(err)
            }
        }
    }

    /// Replaces the last message's active swipe, excluding it from its own
    /// context. On failure the prior content comes back verbatim.
    pub async fn regenerate_message(&mut self, with_image: bool) -> Result<GenerationOutcome> {
        let _flight = self.begin()?;
        let original = self
            .chat
            .last_message()
            .map(|m| m.content().to_string())
            .ok_or_else(|| Error::InvalidChat("chat has no messages".into()))?;

        if let Some(last) = self.chat.last_message_mut() {
            last.set_content(GENERATING_PLACEHOLDER);
        }

        let config = self.base_config().regenerate();
        let result = match self.build_prompt(&config).await {
            Ok(prompt) => self.run_generation(&prompt).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(text) => {
                if let Some(last) = self.chat.last_message_mut() {
                    last.set_content(text.clone());
                    last.send_date = crate::utils::now_millis();
                }
                self.store.save(&self.chat)?;
                let image_error = if with_image {
                    self.attach_image(&text).await
                } else {
                    None
                };
                Ok(GenerationOutcome { text, image_error })
            }
            Err(err) => {
                if let Some(last) = self.chat.last_message_mut() {
                    last.set_content(original);
                }
                Err(err)
            }
        }
    }

    /// Adds a fresh swipe to the last message and fills it. On failure the
    /// swipe is removed and the previous one reactivated.
    pub async fn generate_next_swipe(&mut self, with_image: bool) -> Result<GenerationOutcome> {
        let _flight = self.begin()?;
        let previous_swipe = {
            let last = self
                .chat
                .last_message_mut()
                .ok_or_else(|| Error::InvalidChat("chat has no messages".into()))?;
            let previous = last.swipe_id;
            last.push_swipe(GENERATING_PLACEHOLDER);
            previous
        };

        let config = self.base_config().regenerate();
        let result = match self.build_prompt(&config).await {
            Ok(prompt) => self.run_generation(&prompt).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(text) => {
                if let Some(last) = self.chat.last_message_mut() {
                    last.set_content(text.clone());
                    last.send_date = crate::utils::now_millis();
                }
                self.store.save(&self.chat)?;
                let image_error = if with_image {
                    self.attach_image(&text).await
                } else {
                    None
                };
                Ok(GenerationOutcome { text, image_error })
            }
            Err(err) => {
                if let Some(last) = self.chat.last_message_mut() {
                    last.remove_last_swipe();
                    last.swipe_id = previous_swipe.min(last.swipes.len() - 1);
                }
                Err(err)
            }
        }
    }

    /// Asks the backend to drop the in-flight call. The call itself then
    /// fails and takes the normal failure path.
    pub async fn abort(&self) -> Result<()> {
        self.backend.abort().await
    }

    pub fn swipe_left(&mut self) -> Result<bool> {
        self.reject_while_generating()?;
        let moved = self.chat.last_message_mut().is_some_and(Message::swipe_left);
        if moved {
            self.store.save(&self.chat)?;
        }
        Ok(moved)
    }

    pub fn swipe_right(&mut self) -> Result<bool> {
        self.reject_while_generating()?;
        let moved = self.chat.last_message_mut().is_some_and(Message::swipe_right);
        if moved {
            self.store.save(&self.chat)?;
        }
        Ok(moved)
    }

    pub fn update_swipe(&mut self, index: usize, text: impl Into<String>) -> Result<bool> {
        self.reject_while_generating()?;
        let updated = self
            .chat
            .last_message_mut()
            .is_some_and(|m| m.update_swipe(index, text));
        if updated {
            self.store.save(&self.chat)?;
        }
        Ok(updated)
    }

    fn reject_while_generating(&self) -> Result<()> {
        if self.is_generating() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Non-final messages are swipe-frozen; drop image files whose swipe no
    /// longer exists.
    fn freeze_earlier_messages(&mut self) -> Result<()> {
        let mut dropped = Vec::new();
        let len = self.chat.messages.len();
        for message in self.chat.messages.iter_mut().take(len.saturating_sub(1)) {
            dropped.extend(message.prune_orphan_images());
        }
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "pruning orphaned swipe images");
            self.store.delete_images(&dropped)?;
        }
        Ok(())
    }

    async fn describe_image(&self, image: &[u8]) -> Result<String> {
        let backend = self
            .image_backend
            .as_ref()
            .ok_or_else(|| Error::Image("no image backend configured".into()))?;
        backend.interrogate(image).await
    }

    /// Uniform post-step: synthesize an image from the generated text and
    /// record it under the active swipe. Failures are reported, never
    /// rolled back into the text result.
    async fn attach_image(&mut self, text: &str) -> Option<String> {
        let result = self.generate_image(text).await;
        match result {
            Ok(()) => None,
            Err(err) => {
                warn!(%err, "image attachment failed");
                Some(err.to_string())
            }
        }
    }

    async fn generate_image(&mut self, text: &str) -> Result<()> {
        let backend = self
            .image_backend
            .as_ref()
            .ok_or_else(|| Error::Image("no image backend configured".into()))?;
        let prompt = ImagePrompt {
            text: text.to_string(),
            negative_text: self.settings.image.negative_text.clone(),
            seed: -1,
            steps: self.settings.image.steps,
            width: self.settings.image.width,
            height: self.settings.image.height,
            style: self.settings.image.style.clone(),
        };
        let bytes = backend.generate(&prompt).await?;

        let message_index = self.chat.messages.len().saturating_sub(1);
        let swipe_index = self
            .chat
            .last_message()
            .map(|m| m.swipe_id)
            .unwrap_or_default();
        let path = self
            .store
            .store_image(&self.chat, message_index, swipe_index, &bytes)?;
        if let Some(last) = self.chat.last_message_mut() {
            last.images.insert(swipe_index, path);
        }
        self.store.save(&self.chat)?;
        Ok(())
    }
}

/// Continuations flow mid-sentence; only insert a space when the fragment
/// does not already start with one.
fn join_continuation(original: &str, fragment: &str) -> String {
    if fragment.starts_with(char::is_whitespace) || original.ends_with(char::is_whitespace) {
        format!("{}{}", original, fragment)
    } else {
        format!("{} {}", original, fragment)
    }
}
