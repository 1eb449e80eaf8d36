use super::normalize;
use crate::chat::types::Chat;
use crate::error::{Error, Result};

/// Current format: one JSON document, shape identical to the in-memory
/// model. The only codec that also encodes.
pub fn decode(file_name: &str, folder_name: &str, bytes: &[u8]) -> Result<Chat> {
    let mut chat: Chat = serde_json::from_slice(bytes)?;
    if chat.file_name.is_empty() {
        return Err(Error::InvalidChat(format!(
            "{}: missing fileName",
            file_name
        )));
    }
    // The disk location wins over whatever the document claims.
    chat.file_name = file_name.to_string();
    chat.folder_name = folder_name.to_string();
    normalize(&mut chat)?;
    Ok(chat)
}

pub fn encode(chat: &Chat) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(chat)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::Message;
    use crate::utils::now_millis;

    fn make_chat() -> Chat {
        let mut message = Message::new("Seraphina", false, "Hello.");
        message.push_swipe("Hey there.");
        message.images.insert(1, "img/greet.webp".to_string());
        Chat {
            file_name: "2026-01-01@10h00m00s".into(),
            folder_name: "sera".into(),
            create_date: now_millis(),
            messages: vec![message],
        }
    }

    #[test]
    fn encode_decode_is_structural_identity() {
        let chat = make_chat();
        let bytes = encode(&chat).unwrap();
        let decoded = decode(&chat.file_name, &chat.folder_name, &bytes).unwrap();
        assert_eq!(decoded, chat);
    }

    #[test]
    fn encode_is_deterministic() {
        let chat = make_chat();
        assert_eq!(encode(&chat).unwrap(), encode(&chat).unwrap());
    }

    #[test]
    fn out_of_range_swipe_id_is_clamped() {
        let mut chat = make_chat();
        chat.messages[0].swipe_id = 9;
        let bytes = encode(&chat).unwrap();
        let decoded = decode(&chat.file_name, &chat.folder_name, &bytes).unwrap();
        assert_eq!(decoded.messages[0].swipe_id, 1);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode("f", "d", b"not json").is_err());
        assert!(decode("f", "d", b"{\"messages\":[]}").is_err());
    }
}
