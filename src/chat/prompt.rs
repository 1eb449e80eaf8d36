use tracing::debug;

use super::prompts::{
    apply_speaker_placeholders, open_turn_header, persona_skeleton, turn_text, PromptKind,
    DEFAULT_PATTERN,
};
use super::types::{Character, Chat, Message};
use super::window::ContextWindowState;
use crate::backend::GenerationRequest;
use crate::error::Result;
use crate::settings::GenerationSettings;
use crate::tokenizer::Tokenizer;

/// Immutable description of one prompt build. `with_*` methods return a new
/// value, so configurations can be shared between chats without aliasing
/// builder state.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub kind: PromptKind,
    /// Continue the last turn in place instead of opening a new one.
    pub complete: bool,
    /// Exclude the final message from its own context.
    pub regenerate: bool,
    /// The next turn belongs to the user, not the character.
    pub for_user: bool,
    /// Extra turns appended after the chat's own history.
    pub additional_messages: Vec<Message>,
    /// Oldest message index the window walk may reach.
    pub first_message_index: usize,
    pub pattern: String,
    pub system_prompt: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            kind: PromptKind::Instruct,
            complete: false,
            regenerate: false,
            for_user: false,
            additional_messages: Vec::new(),
            first_message_index: 0,
            pattern: DEFAULT_PATTERN.to_string(),
            system_prompt: String::new(),
        }
    }
}

impl PromptConfig {
    pub fn chat_kind(mut self) -> Self {
        self.kind = PromptKind::Chat;
        self
    }

    pub fn complete(mut self) -> Self {
        self.complete = true;
        self
    }

    pub fn regenerate(mut self) -> Self {
        self.regenerate = true;
        self
    }

    pub fn for_user(mut self) -> Self {
        self.for_user = true;
        self
    }

    pub fn with_additional_messages(mut self, messages: Vec<Message>) -> Self {
        self.additional_messages = messages;
        self
    }

    pub fn with_first_message_index(mut self, index: usize) -> Self {
        self.first_message_index = index;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// A backend-ready prompt plus the window metadata the caller feeds back
/// into the next build.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub text: String,
    /// Oldest message index that made it into the window; the next build's
    /// sliding-window start.
    pub first_message_index: usize,
    pub stop_sequences: Vec<String>,
    pub max_length: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl BuiltPrompt {
    pub fn to_request(&self) -> GenerationRequest {
        GenerationRequest {
            text: self.text.clone(),
            max_length: self.max_length,
            stop_sequences: self.stop_sequences.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

pub struct PromptBuilder {
    tokenizer: Tokenizer,
    settings: GenerationSettings,
}

impl PromptBuilder {
    pub fn new(tokenizer: Tokenizer, settings: GenerationSettings) -> Self {
        Self {
            tokenizer,
            settings,
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Assembles the bounded context window and the final prompt text.
    ///
    /// Any token-counting failure aborts the whole build; there is no
    /// best-effort prompt.
    pub async fn build(
        &self,
        config: &PromptConfig,
        character: &Character,
        chat: &Chat,
        user_name: &str,
    ) -> Result<BuiltPrompt> {
        let skeleton = persona_skeleton(&config.pattern, character, &config.system_prompt);
        let base = apply_speaker_placeholders(
            &skeleton.replace("{{chat}}", ""),
            &character.name,
            user_name,
        );
        let base_tokens = self.tokenizer.count(&base).await?;

        let mut tokens_left = self.settings.max_context_length as i64
            - base_tokens as i64
            - self.settings.context_margin as i64;

        let combined: Vec<&Message> = chat
            .messages
            .iter()
            .chain(config.additional_messages.iter())
            .collect();
        let last_eligible = if config.regenerate {
            combined.len().checked_sub(2)
        } else {
            combined.len().checked_sub(1)
        };

        let mut window = String::new();
        let mut first_included = config.first_message_index;

        if let Some(last_eligible) = last_eligible {
            let mut index = last_eligible as i64;
            while index >= config.first_message_index as i64 {
                let message = combined[index as usize];
                let prefix_only = config.complete && index as usize == last_eligible;
                let turn = turn_text(
                    message,
                    config.kind,
                    &self.settings.user_turn_template,
                    &self.settings.model_turn_template,
                    prefix_only,
                );
                let turn = apply_speaker_placeholders(&turn, &character.name, user_name);
                let cost = self.tokenizer.count(&turn).await? as i64;
                if cost > tokens_left {
                    // This message no longer fits; the window starts right
                    // after it.
                    first_included = index as usize + 1;
                    break;
                }
                tokens_left -= cost;
                window.insert_str(0, &turn);
                index -= 1;
            }
        }

        debug!(
            first_included,
            tokens_left, "context window assembled"
        );

        let mut chat_block = window;
        let mut stop_sequences = self.settings.stop_sequences.clone();
        if !config.complete {
            let speaker = if config.for_user { user_name } else { &character.name };
            chat_block.push_str(&open_turn_header(
                config.kind,
                speaker,
                config.for_user,
                &self.settings.user_turn_template,
                &self.settings.model_turn_template,
            ));
        }
        if config.kind == PromptKind::Chat {
            // In transcript mode the other speaker's header ends the turn.
            let other = if config.for_user { &character.name } else { user_name };
            stop_sequences.push(format!("\n{}:", other));
        }

        let text = apply_speaker_placeholders(
            &skeleton.replace("{{chat}}", &chat_block),
            &character.name,
            user_name,
        );

        Ok(BuiltPrompt {
            text,
            first_message_index: first_included,
            stop_sequences,
            max_length: self.settings.max_output_tokens,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
        })
    }

    /// Moves the sliding-window start after the truncation point shifted.
    ///
    /// Walks forward from the old start accumulating turn costs until the
    /// configured buffer is freed, so the next builds skip the re-tokenized
    /// head of the history without recomputing the whole window. Turns are
    /// priced with the same kind and templates the triggering build used.
    pub async fn advance_window(
        &self,
        config: &PromptConfig,
        chat: &Chat,
        character: &Character,
        user_name: &str,
        state: &mut ContextWindowState,
        new_marker: usize,
    ) -> Result<()> {
        let old_start = state.start_index();
        if new_marker <= old_start || chat.messages.is_empty() {
            return Ok(());
        }

        let mut freed = 0usize;
        let mut index = old_start;
        while index < chat.messages.len().saturating_sub(1) && freed < self.settings.window_buffer_tokens
        {
            let turn = turn_text(
                &chat.messages[index],
                config.kind,
                &self.settings.user_turn_template,
                &self.settings.model_turn_template,
                false,
            );
            let turn = apply_speaker_placeholders(&turn, &character.name, user_name);
            freed += self.tokenizer.count(&turn).await?;
            index += 1;
        }

        state.record(index.min(new_marker));
        debug!(old_start, resumed_at = state.start_index(), "window advanced");
        Ok(())
    }
}
