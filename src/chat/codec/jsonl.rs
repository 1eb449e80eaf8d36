use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use super::normalize;
use crate::chat::types::{Chat, Message};
use crate::error::{Error, Result};

/// Legacy line-delimited chat log: first line is chat metadata, every
/// following line one message. Decode only; saving always re-encodes the
/// current format.
#[derive(Deserialize)]
struct MetaLine {
    character_name: String,
    #[serde(default)]
    create_date: Value,
}

#[derive(Deserialize)]
struct MessageLine {
    name: String,
    is_user: bool,
    #[serde(default)]
    send_date: Value,
    #[serde(default)]
    mes: String,
    #[serde(default)]
    swipes: Option<Vec<String>>,
    #[serde(default)]
    swipe_id: Option<usize>,
}

pub fn decode(file_name: &str, folder_name: &str, bytes: &[u8]) -> Result<Chat> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::InvalidChat(format!("{}: not utf-8", file_name)))?;
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let meta_line = lines
        .next()
        .ok_or_else(|| Error::InvalidChat(format!("{}: empty file", file_name)))?;
    let meta: MetaLine = serde_json::from_str(meta_line)?;
    let _ = meta.character_name;

    let mut messages = Vec::new();
    for line in lines {
        let parsed: MessageLine = serde_json::from_str(line)?;
        messages.push(message_from_line(parsed));
    }

    let mut chat = Chat {
        file_name: file_name.to_string(),
        folder_name: folder_name.to_string(),
        create_date: parse_date(&meta.create_date),
        messages,
    };
    normalize(&mut chat)?;
    Ok(chat)
}

fn message_from_line(line: MessageLine) -> Message {
    let swipes = match line.swipes {
        Some(swipes) if !swipes.is_empty() => swipes,
        _ => vec![line.mes],
    };
    Message {
        name: line.name,
        is_user: line.is_user,
        send_date: parse_date(&line.send_date),
        swipe_id: line.swipe_id.unwrap_or(0),
        swipes,
        images: Default::default(),
    }
}

/// Legacy dates show up as epoch millis or as formatted strings; anything
/// unparseable loads as 0 rather than failing the chat.
pub(super) fn parse_date(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => {
            for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d@%Hh%Mm%Ss"] {
                if let Ok(parsed) = NaiveDateTime::parse_from_str(s, format) {
                    return parsed.and_utc().timestamp_millis().max(0) as u64;
                }
            }
            0
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = concat!(
        "{\"user_name\":\"You\",\"character_name\":\"Seraphina\",\"create_date\":\"2023-06-28 14:13:27\"}\n",
        "{\"name\":\"Seraphina\",\"is_user\":false,\"send_date\":1687961607000,\"mes\":\"Hello.\",\"swipes\":[\"Hello.\",\"Hey.\"],\"swipe_id\":1}\n",
        "{\"name\":\"You\",\"is_user\":true,\"send_date\":1687961650000,\"mes\":\"Hi!\"}\n",
    );

    #[test]
    fn decodes_messages_and_swipes() {
        let chat = decode("old-log", "sera", LOG.as_bytes()).unwrap();
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].swipes, vec!["Hello.", "Hey."]);
        assert_eq!(chat.messages[0].swipe_id, 1);
        assert_eq!(chat.messages[0].content(), "Hey.");
        // A line without swipes becomes a single-swipe message.
        assert_eq!(chat.messages[1].swipes, vec!["Hi!"]);
        assert!(chat.messages[1].is_user);
        assert!(chat.create_date > 0);
    }

    #[test]
    fn rejects_single_json_documents() {
        assert!(decode("f", "d", b"{\n  \"fileName\": \"x\"\n}").is_err());
    }

    #[test]
    fn unparseable_date_becomes_zero() {
        assert_eq!(parse_date(&Value::String("yesterday-ish".into())), 0);
        assert_eq!(parse_date(&Value::Null), 0);
        assert_eq!(parse_date(&serde_json::json!(1687961607000u64)), 1687961607000);
    }
}
