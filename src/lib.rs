//! Client-side orchestration for turn-based character chat: token-budgeted
//! prompt assembly, swipe branching, generation workflows with rollback,
//! and chat persistence with legacy-format migration.

pub mod backend;
pub mod chat;
pub mod error;
pub mod settings;
pub mod storage;
pub mod tokenizer;
pub mod utils;

pub use backend::{ImageGenerationBackend, TextGenerationBackend};
pub use chat::{Character, Chat, ChatStore, ConversationGenerator};
pub use error::{Error, Result};
pub use settings::GenerationSettings;
pub use storage::{FileStorage, Storage};
