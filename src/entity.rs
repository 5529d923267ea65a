use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Persona selected when the current one is deleted, and on first run.
pub const FALLBACK_PERSONA_ID: &str = "psychologist";

pub const NAME_MAX_CHARS: usize = 50;
pub const PROMPT_MIN_CHARS: usize = 10;
pub const PROMPT_MAX_CHARS: usize = 2000;
pub const DESCRIPTION_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub description: String,
    #[serde(default)]
    pub is_built_in: bool,
}

impl Persona {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            system_prompt: system_prompt.into(),
            description: description.into(),
            is_built_in: false,
        }
    }

    /// Creates a user-defined persona with a fresh id.
    pub fn from_draft(draft: PersonaDraft) -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            draft.name,
            draft.system_prompt,
            draft.description,
        )
    }

    pub fn built_ins() -> Vec<Persona> {
        vec![
            Persona {
                is_built_in: true,
                ..Persona::new(
                    "cuteCat",
                    "Cute Cat",
                    "You are a cute cat. Answer questions with meows and a playful, \
                     affectionate tone, the way a friendly little kitten would. \
                     Always answer in Chinese.",
                    "A friendly, adorable little cat",
                )
            },
            Persona {
                is_built_in: true,
                ..Persona::new(
                    FALLBACK_PERSONA_ID,
                    "Counsellor",
                    "You are a professional counsellor who draws on Adlerian psychology. \
                     Always answer the user's questions in Chinese, the way a supportive \
                     friend would: avoid jargon and keep replies short.",
                    "A professional counsellor",
                )
            },
        ]
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Partial update for `update_persona`. The id is not patchable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaPatch {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub description: Option<String>,
}

impl PersonaPatch {
    pub fn apply(&self, persona: &mut Persona) {
        if let Some(name) = &self.name {
            persona.name = name.clone();
        }
        if let Some(prompt) = &self.system_prompt {
            persona.system_prompt = prompt.clone();
        }
        if let Some(description) = &self.description {
            persona.description = description.clone();
        }
    }
}

/// Form input for creating or editing a persona.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaDraft {
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub description: String,
}

/// Field-level validation failures, keyed by the camelCase field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(pub BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    fn insert(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }
}

/// At least two characters, non-whitespace at both ends, no line breaks inside.
fn is_trimmed_single_line(name: &str) -> bool {
    let chars: Vec<char> = name.chars().collect();
    match (chars.first(), chars.last()) {
        (Some(first), Some(last)) if chars.len() >= 2 => {
            !first.is_whitespace()
                && !last.is_whitespace()
                && !chars.iter().any(|c| matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}'))
        }
        _ => false,
    }
}

impl PersonaDraft {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();

        let name_len = self.name.chars().count();
        if name_len == 0 {
            errors.insert("name", "Name must not be empty");
        } else if name_len > NAME_MAX_CHARS {
            errors.insert(
                "name",
                format!("Name must be at most {} characters", NAME_MAX_CHARS),
            );
        } else if !is_trimmed_single_line(&self.name) {
            errors.insert("name", "Name must not start or end with whitespace");
        }

        let prompt_len = self.system_prompt.chars().count();
        if prompt_len < PROMPT_MIN_CHARS {
            errors.insert(
                "systemPrompt",
                format!("System prompt needs at least {} characters", PROMPT_MIN_CHARS),
            );
        } else if prompt_len > PROMPT_MAX_CHARS {
            errors.insert(
                "systemPrompt",
                format!("System prompt must be at most {} characters", PROMPT_MAX_CHARS),
            );
        }

        if self.description.chars().count() > DESCRIPTION_MAX_CHARS {
            errors.insert(
                "description",
                format!(
                    "Description must be at most {} characters",
                    DESCRIPTION_MAX_CHARS
                ),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn into_patch(self) -> PersonaPatch {
        PersonaPatch {
            name: Some(self.name),
            system_prompt: Some(self.system_prompt),
            description: Some(self.description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, prompt: &str, description: &str) -> PersonaDraft {
        PersonaDraft {
            name: name.into(),
            system_prompt: prompt.into(),
            description: description.into(),
        }
    }

    #[test]
    fn test_built_ins_are_protected_and_include_fallback() {
        let personas = Persona::built_ins();
        assert!(personas.iter().all(|p| p.is_built_in));
        assert!(personas.iter().any(|p| p.id == FALLBACK_PERSONA_ID));
        assert!(personas.iter().any(|p| p.id == "cuteCat"));
    }

    #[test]
    fn test_valid_draft() {
        assert!(draft("Pirate", "Talk like a pirate, always.", "Arr").validate().is_ok());
    }

    #[test]
    fn test_draft_reports_each_field() {
        let errors = draft(" padded ", "short", &"x".repeat(201))
            .validate()
            .unwrap_err();
        assert!(errors.get("name").unwrap().contains("whitespace"));
        assert!(errors.get("systemPrompt").unwrap().contains("at least"));
        assert!(errors.get("description").is_some());
    }

    #[test]
    fn test_draft_length_limits_count_chars() {
        // 50 multi-byte characters is still within the limit.
        let name = "貓".repeat(50);
        assert!(draft(&name, "0123456789", "").validate().is_ok());
        let errors = draft(&"貓".repeat(51), "0123456789", "").validate().unwrap_err();
        assert!(errors.get("name").is_some());
        assert!(draft("", "0123456789", "").validate().is_err());
    }

    #[test]
    fn test_name_shape() {
        let prompt = "0123456789";
        assert!(draft("Al", prompt, "").validate().is_ok());
        assert!(draft("Old Sea Dog", prompt, "").validate().is_ok());

        for name in ["A", "Sea\nDog", "Sea\r\nDog", "Dog\t", "\u{3000}Cat"] {
            let errors = draft(name, prompt, "").validate().unwrap_err();
            assert!(
                errors.get("name").unwrap().contains("whitespace"),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_built_in_prompts_ask_for_chinese_replies() {
        for persona in Persona::built_ins() {
            assert!(persona.system_prompt.contains("in Chinese"), "{}", persona);
        }
    }

    #[test]
    fn test_from_draft_is_not_built_in() {
        let persona = Persona::from_draft(draft("Pirate", "Talk like a pirate.", ""));
        assert!(!persona.is_built_in);
        assert!(!persona.id.is_empty());
    }
}
