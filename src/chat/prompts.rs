use super::types::{Character, Message};

/// Default prompt pattern. Every placeholder resolves to a full section
/// (header included) when the backing field is non-blank, and to nothing at
/// all otherwise, so blank persona fields never leave an empty header
/// behind.
pub const DEFAULT_PATTERN: &str = "{{systemPrompt}}{{persona}}{{personality}}{{scenario}}{{userDescription}}{{messageExample}}{{chat}}";

const PROMPT_SLOT: &str = "{{prompt}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Plain `Name: text` transcript turns.
    Chat,
    /// Turns wrapped in instruction templates.
    Instruct,
}

fn section(header: &str, value: &str) -> String {
    if value.trim().is_empty() {
        String::new()
    } else {
        format!("{}: {}\n", header, value.trim())
    }
}

/// Applies every persona placeholder of `pattern` except `{{chat}}`.
pub fn persona_skeleton(pattern: &str, character: &Character, system_prompt: &str) -> String {
    pattern
        .replace("{{systemPrompt}}", &section("System", system_prompt))
        .replace("{{persona}}", &section("{{char}}'s Persona", &character.description))
        .replace("{{personality}}", &section("Personality", &character.personality))
        .replace("{{scenario}}", &section("Scenario", &character.scenario))
        .replace(
            "{{userDescription}}",
            &section("{{user}}'s Persona", &character.user_description),
        )
        .replace(
            "{{messageExample}}",
            &section("Example dialogue", &character.message_example),
        )
}

/// Final substitution pass for speaker tokens across the whole prompt.
pub fn apply_speaker_placeholders(text: &str, char_name: &str, user_name: &str) -> String {
    text.replace("{{char}}", char_name).replace("{{user}}", user_name)
}

/// Renders one transcript turn.
///
/// In instruct mode the turn is wrapped with the speaker's instruction
/// template; `prefix_only` keeps the wrapper open (no closing part after
/// the content) so the backend continues the text instead of starting a
/// new turn.
pub fn turn_text(
    message: &Message,
    kind: PromptKind,
    user_template: &str,
    model_template: &str,
    prefix_only: bool,
) -> String {
    match kind {
        PromptKind::Chat => format!("{}: {}\n", message.name, message.content()),
        PromptKind::Instruct => {
            let template = if message.is_user {
                user_template
            } else {
                model_template
            };
            let content = message.content();
            if prefix_only {
                match template.find(PROMPT_SLOT) {
                    Some(pos) => format!("{}{}", &template[..pos], content),
                    None => content.to_string(),
                }
            } else if template.contains(PROMPT_SLOT) {
                template.replace(PROMPT_SLOT, content)
            } else {
                format!("{}{}\n", template, content)
            }
        }
    }
}

/// Open header for the turn the backend is asked to produce next.
pub fn open_turn_header(
    kind: PromptKind,
    speaker_name: &str,
    for_user: bool,
    user_template: &str,
    model_template: &str,
) -> String {
    match kind {
        PromptKind::Chat => format!("{}:", speaker_name),
        PromptKind::Instruct => {
            let template = if for_user { user_template } else { model_template };
            match template.find(PROMPT_SLOT) {
                Some(pos) => template[..pos].to_string(),
                None => template.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_character() -> Character {
        Character {
            file_name: "sera".into(),
            name: "Seraphina".into(),
            description: "A guardian of the forest".into(),
            personality: String::new(),
            scenario: "A clearing at dusk".into(),
            first_message: "Hello.".into(),
            alternate_greetings: vec![],
            message_example: String::new(),
            user_description: String::new(),
            chat_file: None,
        }
    }

    #[test]
    fn blank_fields_leave_no_headers() {
        let skeleton = persona_skeleton(DEFAULT_PATTERN, &make_character(), "");
        assert!(skeleton.contains("{{char}}'s Persona: A guardian of the forest"));
        assert!(skeleton.contains("Scenario: A clearing at dusk"));
        assert!(!skeleton.contains("Personality:"));
        assert!(!skeleton.contains("System:"));
        assert!(!skeleton.contains("Example dialogue:"));
    }

    #[test]
    fn instruct_turn_wraps_content() {
        let msg = Message::new("You", true, "hi there");
        let text = turn_text(
            &msg,
            PromptKind::Instruct,
            "### Instruction:\n{{prompt}}\n",
            "### Response:\n{{prompt}}\n",
            false,
        );
        assert_eq!(text, "### Instruction:\nhi there\n");
    }

    #[test]
    fn prefix_only_turn_stays_open() {
        let msg = Message::new("Seraphina", false, "The forest");
        let text = turn_text(
            &msg,
            PromptKind::Instruct,
            "### Instruction:\n{{prompt}}\n",
            "### Response:\n{{prompt}}\n",
            true,
        );
        assert_eq!(text, "### Response:\nThe forest");
    }

    #[test]
    fn open_header_selects_speaker() {
        let header = open_turn_header(
            PromptKind::Instruct,
            "Seraphina",
            false,
            "### Instruction:\n{{prompt}}\n",
            "### Response:\n{{prompt}}\n",
        );
        assert_eq!(header, "### Response:\n");
        let header = open_turn_header(PromptKind::Chat, "Seraphina", false, "", "");
        assert_eq!(header, "Seraphina:");
    }

    #[test]
    fn speaker_placeholders_cover_whole_prompt() {
        let text = "{{char}} smiles at {{user}}. {{char}} waits.";
        assert_eq!(
            apply_speaker_placeholders(text, "Seraphina", "You"),
            "Seraphina smiles at You. Seraphina waits."
        );
    }
}
