pub mod budget;
pub mod codec;
pub mod generator;
pub mod prompt;
pub mod prompts;
pub mod store;
pub mod types;
pub mod window;

pub use generator::{ConversationGenerator, GenerationOutcome};
pub use prompt::{BuiltPrompt, PromptBuilder, PromptConfig};
pub use store::ChatStore;
pub use types::{Character, Chat, ChatInfo, Message};
