use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::utils::now_millis;

/// A persona the application chats with. `file_name` is the immutable
/// identity; everything else is editable in settings and saved explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub file_name: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub first_message: String,
    #[serde(default)]
    pub alternate_greetings: Vec<String>,
    #[serde(default)]
    pub message_example: String,
    #[serde(default)]
    pub user_description: String,
    /// File name of the currently associated chat, if any.
    #[serde(default)]
    pub chat_file: Option<String>,
}

impl Character {
    /// Swipes of the seeded greeting message: the first message plus every
    /// alternate greeting.
    pub fn greeting_swipes(&self) -> Vec<String> {
        let mut swipes = vec![self.first_message.clone()];
        swipes.extend(self.alternate_greetings.iter().cloned());
        swipes
    }
}

/// One conversation turn. `swipes` holds the alternative completions for
/// this turn; `swipe_id` selects the active one. Invariant: `swipes` is
/// never empty and `swipe_id` is always in range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub name: String,
    pub is_user: bool,
    pub send_date: u64,
    pub swipes: Vec<String>,
    pub swipe_id: usize,
    /// Swipe index -> stored image path. BTreeMap keeps serialization
    /// deterministic so an unchanged chat saves byte-identically.
    #[serde(default)]
    pub images: BTreeMap<usize, String>,
}

impl Message {
    pub fn new(name: impl Into<String>, is_user: bool, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_user,
            send_date: now_millis(),
            swipes: vec![text.into()],
            swipe_id: 0,
            images: BTreeMap::new(),
        }
    }

    pub fn content(&self) -> &str {
        self.swipes
            .get(self.swipe_id)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Overwrites the active swipe.
    pub fn set_content(&mut self, text: impl Into<String>) {
        if let Some(active) = self.swipes.get_mut(self.swipe_id) {
            *active = text.into();
        }
    }

    /// Appends a new swipe and makes it active. Returns its index.
    pub fn push_swipe(&mut self, text: impl Into<String>) -> usize {
        self.swipes.push(text.into());
        self.swipe_id = self.swipes.len() - 1;
        self.swipe_id
    }

    /// Removes the newest swipe and its image, reactivating the previous
    /// one. Refuses to empty the swipe list.
    pub fn remove_last_swipe(&mut self) -> bool {
        if self.swipes.len() <= 1 {
            return false;
        }
        let removed = self.swipes.len() - 1;
        self.swipes.pop();
        self.images.remove(&removed);
        if self.swipe_id >= self.swipes.len() {
            self.swipe_id = self.swipes.len() - 1;
        }
        true
    }

    pub fn swipe_left(&mut self) -> bool {
        if self.swipe_id == 0 {
            return false;
        }
        self.swipe_id -= 1;
        true
    }

    pub fn swipe_right(&mut self) -> bool {
        if self.swipe_id + 1 >= self.swipes.len() {
            return false;
        }
        self.swipe_id += 1;
        true
    }

    /// Overwrites the swipe at `index`, or appends when `index` is one past
    /// the end (the "generate one more alternative" path).
    pub fn update_swipe(&mut self, index: usize, text: impl Into<String>) -> bool {
        if index < self.swipes.len() {
            self.swipes[index] = text.into();
            true
        } else if index == self.swipes.len() {
            self.swipes.push(text.into());
            true
        } else {
            false
        }
    }

    /// Drops image entries whose swipe no longer exists. Applied to
    /// non-final messages once a later turn freezes their branching.
    pub fn prune_orphan_images(&mut self) -> Vec<String> {
        let limit = self.swipes.len();
        let orphaned: Vec<usize> = self
            .images
            .keys()
            .copied()
            .filter(|index| *index >= limit)
            .collect();
        orphaned
            .into_iter()
            .filter_map(|index| self.images.remove(&index))
            .collect()
    }
}

/// A persisted conversation. Message order is turn order and is never
/// reordered; the sequence is never empty after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub file_name: String,
    /// The owning character's `file_name`.
    pub folder_name: String,
    pub create_date: u64,
    pub messages: Vec<Message>,
}

impl Chat {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_message_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut()
    }

    pub fn info(&self) -> ChatInfo {
        ChatInfo {
            file_name: self.file_name.clone(),
            folder_name: self.folder_name.clone(),
            create_date: self.create_date,
            message_count: self.messages.len(),
        }
    }

    /// Every stored image path referenced by any message.
    pub fn image_paths(&self) -> Vec<String> {
        self.messages
            .iter()
            .flat_map(|m| m.images.values().cloned())
            .collect()
    }
}

/// Lightweight listing entry for chat pickers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub file_name: String,
    pub folder_name: String,
    pub create_date: u64,
    pub message_count: usize,
}
