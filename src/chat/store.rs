use std::sync::Arc;

use tracing::{debug, info, warn};

use super::codec::{self, current, SourceFormat};
use super::types::{Character, Chat, ChatInfo, Message};
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::utils::{default_chat_file_name, sanitize_file_name};

const CHATS_DIR: &str = "chats";
const CHARACTERS_DIR: &str = "characters";

/// Locates, migrates and persists every chat a character owns. One store
/// serves all characters; paths are derived from the character's
/// `file_name` (= the chat's `folder_name`).
pub struct ChatStore {
    storage: Arc<dyn Storage>,
}

impl ChatStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn chat_dir(folder: &str) -> String {
        format!("{}/{}", CHATS_DIR, sanitize_file_name(folder))
    }

    fn chat_path(folder: &str, file_name: &str) -> String {
        format!("{}/{}.json", Self::chat_dir(folder), sanitize_file_name(file_name))
    }

    fn image_path(folder: &str, chat_file: &str, message_index: usize, swipe_index: usize) -> String {
        format!(
            "{}/{}-images/msg{}-swipe{}.webp",
            Self::chat_dir(folder),
            sanitize_file_name(chat_file),
            message_index,
            swipe_index
        )
    }

    fn character_path(file_name: &str) -> String {
        format!("{}/{}.json", CHARACTERS_DIR, sanitize_file_name(file_name))
    }

    /// Loads every chat in the character's folder, migrating legacy formats
    /// in memory. Files no decoder recognizes are skipped, not fatal.
    pub fn load_all(&self, character_file_name: &str) -> Result<Vec<Chat>> {
        let dir = Self::chat_dir(character_file_name);
        let mut chats = Vec::new();
        for entry in self.storage.list(&dir)? {
            let Some(bytes) = self.storage.read(&format!("{}/{}", dir, entry))? else {
                continue;
            };
            let stem = entry
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(entry.as_str());
            match codec::decode(stem, character_file_name, &bytes) {
                Ok(decoded) => {
                    let mut chat = decoded.chat;
                    if decoded.format == SourceFormat::Archive {
                        self.extract_archive_images(&mut chat, decoded.pending_images)?;
                    }
                    debug!(file = entry, format = ?decoded.format, "chat loaded");
                    chats.push(chat);
                }
                Err(err) => {
                    warn!(file = entry, %err, "skipping unreadable chat file");
                }
            }
        }
        chats.sort_by_key(|chat| chat.create_date);
        Ok(chats)
    }

    fn extract_archive_images(
        &self,
        chat: &mut Chat,
        pending: Vec<codec::PendingImage>,
    ) -> Result<()> {
        for image in pending {
            let path = Self::image_path(
                &chat.folder_name,
                &chat.file_name,
                image.message_index,
                image.swipe_index,
            );
            self.storage.write(&path, &image.bytes)?;
            if let Some(message) = chat.messages.get_mut(image.message_index) {
                message.images.insert(image.swipe_index, path);
            }
        }
        Ok(())
    }

    /// Listing entries for chat pickers, newest first.
    pub fn chat_infos(&self, character_file_name: &str) -> Result<Vec<ChatInfo>> {
        let mut infos: Vec<ChatInfo> = self
            .load_all(character_file_name)?
            .iter()
            .map(Chat::info)
            .collect();
        infos.reverse();
        Ok(infos)
    }

    /// Creates a chat seeded with the character's greeting and registers it
    /// as the character's selected chat. Both are persisted.
    pub fn create_chat(&self, character: &mut Character) -> Result<Chat> {
        let mut file_name = default_chat_file_name();
        if self
            .storage
            .exists(&Self::chat_path(&character.file_name, &file_name))?
        {
            file_name = format!("{}-{}", file_name, uuid::Uuid::new_v4());
        }

        let mut greeting = Message::new(character.name.clone(), false, "");
        greeting.swipes = character.greeting_swipes();
        greeting.swipe_id = 0;

        let chat = Chat {
            file_name,
            folder_name: character.file_name.clone(),
            create_date: crate::utils::now_millis(),
            messages: vec![greeting],
        };
        self.save(&chat)?;

        character.chat_file = Some(chat.file_name.clone());
        self.save_character(character)?;
        info!(chat = chat.file_name, character = character.file_name, "chat created");
        Ok(chat)
    }

    /// Writes a generated/attached image for one swipe and returns the
    /// stored path to record in the message's image map.
    pub fn store_image(
        &self,
        chat: &Chat,
        message_index: usize,
        swipe_index: usize,
        bytes: &[u8],
    ) -> Result<String> {
        let path = Self::image_path(&chat.folder_name, &chat.file_name, message_index, swipe_index);
        self.storage.write(&path, bytes)?;
        Ok(path)
    }

    /// Removes image files whose swipes no longer exist.
    pub fn delete_images(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            self.storage.delete(path)?;
        }
        Ok(())
    }

    /// Full-overwrite serialization to the canonical file. Idempotent.
    pub fn save(&self, chat: &Chat) -> Result<()> {
        let path = Self::chat_path(&chat.folder_name, &chat.file_name);
        self.storage.write(&path, &current::encode(chat)?)
    }

    /// Removes the chat file and every image it references.
    pub fn delete(&self, chat: &Chat) -> Result<()> {
        for image in chat.image_paths() {
            self.storage.delete(&image)?;
        }
        self.storage
            .delete(&Self::chat_path(&chat.folder_name, &chat.file_name))?;
        info!(chat = chat.file_name, "chat deleted");
        Ok(())
    }

    /// Resolves the character to exactly one chat: the associated one if it
    /// still loads, else the most recent on disk, else a fresh one.
    pub fn select_if_none_selected(&self, character: &mut Character) -> Result<Chat> {
        if let Some(selected) = character.chat_file.clone() {
            if let Some(bytes) = self
                .storage
                .read(&Self::chat_path(&character.file_name, &selected))?
            {
                if let Ok(chat) = current::decode(&selected, &character.file_name, &bytes) {
                    return Ok(chat);
                }
                warn!(chat = selected, "selected chat unreadable, reselecting");
            }
        }

        if let Some(latest) = self.load_all(&character.file_name)?.pop() {
            character.chat_file = Some(latest.file_name.clone());
            self.save_character(character)?;
            return Ok(latest);
        }
        self.create_chat(character)
    }

    pub fn save_character(&self, character: &Character) -> Result<()> {
        let path = Self::character_path(&character.file_name);
        self.storage.write(&path, &serde_json::to_vec_pretty(character)?)
    }

    pub fn load_character(&self, file_name: &str) -> Result<Character> {
        let path = Self::character_path(file_name);
        let bytes = self
            .storage
            .read(&path)?
            .ok_or_else(|| Error::InvalidChat(format!("character {} not found", file_name)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileStorage;

    fn make_store() -> (tempfile::TempDir, ChatStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatStore::new(Arc::new(FileStorage::new(dir.path())));
        (dir, store)
    }

    fn make_character() -> Character {
        Character {
            file_name: "sera".into(),
            name: "Seraphina".into(),
            description: "A guardian".into(),
            personality: String::new(),
            scenario: String::new(),
            first_message: "Welcome, traveler.".into(),
            alternate_greetings: vec!["Back again?".into()],
            message_example: String::new(),
            user_description: String::new(),
            chat_file: None,
        }
    }

    #[test]
    fn create_chat_seeds_greeting_and_selects_itself() {
        let (_dir, store) = make_store();
        let mut character = make_character();
        let chat = store.create_chat(&mut character).unwrap();

        assert_eq!(chat.messages.len(), 1);
        let greeting = &chat.messages[0];
        assert!(!greeting.is_user);
        assert_eq!(greeting.swipes, vec!["Welcome, traveler.", "Back again?"]);
        assert_eq!(greeting.swipe_id, 0);
        assert_eq!(character.chat_file.as_deref(), Some(chat.file_name.as_str()));

        // Both the chat and the character landed on disk.
        assert_eq!(store.load_all("sera").unwrap().len(), 1);
        let infos = store.chat_infos("sera").unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].message_count, 1);
        let reloaded = store.load_character("sera").unwrap();
        assert_eq!(reloaded.chat_file, character.chat_file);
    }

    #[test]
    fn save_then_load_is_structurally_equal() {
        let (_dir, store) = make_store();
        let mut character = make_character();
        let mut chat = store.create_chat(&mut character).unwrap();

        chat.messages.push(Message::new("You", true, "Hello!"));
        let reply_index = chat.messages.len();
        let mut reply = Message::new("Seraphina", false, "Hi.");
        reply.push_swipe("Greetings.");
        reply.images.insert(1, format!("chats/sera/{}-images/msg{}-swipe1.webp", chat.file_name, reply_index));
        chat.messages.push(reply);
        store.save(&chat).unwrap();

        let loaded = store.load_all("sera").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], chat);
    }

    #[test]
    fn save_is_idempotent_byte_for_byte() {
        let (_dir, store) = make_store();
        let mut character = make_character();
        let chat = store.create_chat(&mut character).unwrap();
        let path = ChatStore::chat_path(&chat.folder_name, &chat.file_name);

        store.save(&chat).unwrap();
        let first = store.storage.read(&path).unwrap().unwrap();
        store.save(&chat).unwrap();
        let second = store.storage.read(&path).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn load_all_skips_unreadable_files() {
        let (_dir, store) = make_store();
        let mut character = make_character();
        store.create_chat(&mut character).unwrap();
        store
            .storage
            .write("chats/sera/corrupt.json", b"definitely not a chat")
            .unwrap();

        assert_eq!(store.load_all("sera").unwrap().len(), 1);
    }

    #[test]
    fn load_all_decodes_legacy_line_format() {
        let (_dir, store) = make_store();
        let log = concat!(
            "{\"user_name\":\"You\",\"character_name\":\"Seraphina\",\"create_date\":1}\n",
            "{\"name\":\"Seraphina\",\"is_user\":false,\"mes\":\"Old greeting.\"}\n",
        );
        store.storage.write("chats/sera/old.jsonl", log.as_bytes()).unwrap();

        let chats = store.load_all("sera").unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].file_name, "old");
        assert_eq!(chats[0].messages[0].content(), "Old greeting.");
    }

    #[test]
    fn delete_removes_chat_and_images() {
        let (_dir, store) = make_store();
        let mut character = make_character();
        let mut chat = store.create_chat(&mut character).unwrap();

        let image_path = "chats/sera/test-image.webp".to_string();
        store.storage.write(&image_path, b"RIFF").unwrap();
        chat.messages[0].images.insert(0, image_path.clone());
        store.save(&chat).unwrap();

        store.delete(&chat).unwrap();
        assert!(!store.storage.exists(&image_path).unwrap());
        assert!(store.load_all("sera").unwrap().is_empty());
    }

    #[test]
    fn select_prefers_associated_then_latest_then_creates() {
        let (_dir, store) = make_store();
        let mut character = make_character();

        // Nothing on disk: a chat is created.
        let created = store.select_if_none_selected(&mut character).unwrap();
        assert_eq!(character.chat_file.as_deref(), Some(created.file_name.as_str()));

        // Association intact: same chat comes back.
        let again = store.select_if_none_selected(&mut character).unwrap();
        assert_eq!(again.file_name, created.file_name);

        // Dangling association: falls back to what exists on disk.
        character.chat_file = Some("missing".into());
        let fallback = store.select_if_none_selected(&mut character).unwrap();
        assert_eq!(fallback.file_name, created.file_name);
        assert_eq!(character.chat_file.as_deref(), Some(created.file_name.as_str()));
    }
}
