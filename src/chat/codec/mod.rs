pub mod archive;
pub mod current;
pub mod jsonl;

use tracing::debug;

use super::types::Chat;
use crate::error::{Error, Result};

/// Which on-disk format a chat was decoded from. Only relevant at load
/// time; the in-memory shape is always the current format's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Current,
    LineDelimited,
    Archive,
}

/// An image embedded in a legacy archive, waiting to be written out as a
/// loose file by the store.
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub message_index: usize,
    pub swipe_index: usize,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct DecodedChat {
    pub chat: Chat,
    pub format: SourceFormat,
    pub pending_images: Vec<PendingImage>,
}

/// Decodes one chat file, trying the current format first and falling back
/// to the legacy decoders.
pub fn decode(file_name: &str, folder_name: &str, bytes: &[u8]) -> Result<DecodedChat> {
    match current::decode(file_name, folder_name, bytes) {
        Ok(chat) => {
            return Ok(DecodedChat {
                chat,
                format: SourceFormat::Current,
                pending_images: Vec::new(),
            })
        }
        Err(err) => debug!(file_name, %err, "not a current-format chat"),
    }
    match jsonl::decode(file_name, folder_name, bytes) {
        Ok(chat) => {
            return Ok(DecodedChat {
                chat,
                format: SourceFormat::LineDelimited,
                pending_images: Vec::new(),
            })
        }
        Err(err) => debug!(file_name, %err, "not a line-delimited chat"),
    }
    match archive::decode(file_name, folder_name, bytes) {
        Ok((chat, pending_images)) => Ok(DecodedChat {
            chat,
            format: SourceFormat::Archive,
            pending_images,
        }),
        Err(_) => Err(Error::InvalidChat(format!(
            "{}: no decoder recognized this file",
            file_name
        ))),
    }
}

/// Clamps decoded data back into the model's invariants: swipes non-empty,
/// active index in range. Legacy files are not trusted to hold them.
pub(crate) fn normalize(chat: &mut Chat) -> Result<()> {
    if chat.messages.is_empty() {
        return Err(Error::InvalidChat(format!(
            "{}: chat has no messages",
            chat.file_name
        )));
    }
    for message in &mut chat.messages {
        if message.swipes.is_empty() {
            message.swipes.push(String::new());
        }
        if message.swipe_id >= message.swipes.len() {
            message.swipe_id = message.swipes.len() - 1;
        }
    }
    Ok(())
}
