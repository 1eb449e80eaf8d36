use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Strips path separators and other characters that are unsafe in a file
/// name. Keeps the result non-empty so a chat can always be addressed.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().to_string();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed
    }
}

/// File name for a freshly created chat, stamped with the local time the
/// same way the legacy client named its chat logs.
pub fn default_chat_file_name() -> String {
    Local::now().format("%Y-%m-%d@%Hh%Mm%Ss").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_file_name("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_file_name("  "), "unnamed");
        assert_eq!(sanitize_file_name("Seraphina"), "Seraphina");
    }
}
