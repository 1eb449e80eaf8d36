use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};

use serde_json::Value;
use tracing::warn;
use zip::ZipArchive;

use super::{jsonl, PendingImage};
use crate::chat::types::Chat;
use crate::error::{Error, Result};

const CHAT_ENTRY: &str = "chat.jsonl";
const ADDITIONAL_ENTRY: &str = "additional.jsonl";

/// Oldest format: a zip bundling the line-delimited chat log, an
/// index-aligned "additional info" log mapping swipe indices to image asset
/// names, and the image bytes as loose `*.webp` entries.
///
/// Alignment rule: line *i* of `additional.jsonl` describes message *i* of
/// the decoded log (the metadata line in `chat.jsonl` has no counterpart).
pub fn decode(
    file_name: &str,
    folder_name: &str,
    bytes: &[u8],
) -> Result<(Chat, Vec<PendingImage>)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let log = read_entry(&mut archive, CHAT_ENTRY)?
        .ok_or_else(|| Error::InvalidChat(format!("{}: archive has no {}", file_name, CHAT_ENTRY)))?;
    let chat = jsonl::decode(file_name, folder_name, &log)?;

    let image_maps = match read_entry(&mut archive, ADDITIONAL_ENTRY)? {
        Some(data) => parse_additional(&data)?,
        None => Vec::new(),
    };

    let mut assets: HashMap<String, Vec<u8>> = HashMap::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if name.ends_with(".webp") {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            assets.insert(name, data);
        }
    }

    let mut pending = Vec::new();
    for (message_index, map) in image_maps.iter().enumerate() {
        if message_index >= chat.messages.len() {
            warn!(
                file_name,
                message_index, "additional.jsonl line without a matching message"
            );
            break;
        }
        for (swipe_index, asset_name) in map {
            match assets.get(asset_name) {
                Some(bytes) => pending.push(PendingImage {
                    message_index,
                    swipe_index: *swipe_index,
                    bytes: bytes.clone(),
                }),
                None => warn!(file_name, asset_name, "archive image asset missing"),
            }
        }
    }

    Ok((chat, pending))
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            Ok(Some(data))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Each line is one JSON object `{ "<swipeIndex>": "<assetName>", ... }`.
fn parse_additional(bytes: &[u8]) -> Result<Vec<BTreeMap<usize, String>>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::InvalidChat("additional.jsonl is not utf-8".into()))?;
    let mut maps = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            maps.push(BTreeMap::new());
            continue;
        }
        let value: Value = serde_json::from_str(line)?;
        let mut map = BTreeMap::new();
        if let Value::Object(entries) = value {
            for (key, value) in entries {
                if let (Ok(index), Some(name)) = (key.parse::<usize>(), value.as_str()) {
                    map.insert(index, name.to_string());
                }
            }
        }
        maps.push(map);
    }
    Ok(maps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub(crate) fn build_archive(
        log: &str,
        additional: Option<&str>,
        images: &[(&str, &[u8])],
    ) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file(CHAT_ENTRY, options).unwrap();
        writer.write_all(log.as_bytes()).unwrap();
        if let Some(additional) = additional {
            writer.start_file(ADDITIONAL_ENTRY, options).unwrap();
            writer.write_all(additional.as_bytes()).unwrap();
        }
        for (name, bytes) in images {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const LOG: &str = concat!(
        "{\"user_name\":\"You\",\"character_name\":\"Seraphina\",\"create_date\":0}\n",
        "{\"name\":\"Seraphina\",\"is_user\":false,\"mes\":\"Hello.\"}\n",
        "{\"name\":\"You\",\"is_user\":true,\"mes\":\"Hi!\"}\n",
        "{\"name\":\"Seraphina\",\"is_user\":false,\"mes\":\"Look.\",\"swipes\":[\"Look.\",\"See.\"]}\n",
    );

    #[test]
    fn reconstructs_image_maps_by_alignment() {
        let additional = "{\"0\":\"greet.webp\"}\n{}\n{\"1\":\"scene.webp\"}\n";
        let bytes = build_archive(
            LOG,
            Some(additional),
            &[("greet.webp", b"AAA"), ("scene.webp", b"BBB")],
        );
        let (chat, pending) = decode("bundle", "sera", &bytes).unwrap();

        assert_eq!(chat.messages.len(), 3);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].message_index, 0);
        assert_eq!(pending[0].swipe_index, 0);
        assert_eq!(pending[0].bytes, b"AAA");
        assert_eq!(pending[1].message_index, 2);
        assert_eq!(pending[1].swipe_index, 1);
        assert_eq!(pending[1].bytes, b"BBB");
    }

    #[test]
    fn missing_assets_are_skipped_not_fatal() {
        let additional = "{\"0\":\"gone.webp\"}\n";
        let bytes = build_archive(LOG, Some(additional), &[]);
        let (chat, pending) = decode("bundle", "sera", &bytes).unwrap();
        assert_eq!(chat.messages.len(), 3);
        assert!(pending.is_empty());
    }

    #[test]
    fn archive_without_additional_log_has_no_images() {
        let bytes = build_archive(LOG, None, &[]);
        let (_, pending) = decode("bundle", "sera", &bytes).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn non_zip_bytes_are_rejected() {
        assert!(decode("f", "d", b"plain text").is_err());
    }
}
