//! The fixed system preamble every conversation context starts from.

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

const HTML_MARKERS: [&str; 2] = ["<!doctype", "<html"];

/// Names of the documents that make up the preamble.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreambleDocuments {
    #[serde(default = "PreambleDocuments::default_persona")]
    pub persona: String,
    #[serde(default = "PreambleDocuments::default_knowledge")]
    pub knowledge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<String>,
}

impl PreambleDocuments {
    fn default_persona() -> String {
        "personality.txt".to_string()
    }

    fn default_knowledge() -> String {
        "knowledge.txt".to_string()
    }
}

impl Default for PreambleDocuments {
    fn default() -> Self {
        Self {
            persona: Self::default_persona(),
            knowledge: Self::default_knowledge(),
            updates: None,
        }
    }
}

/// Persona and knowledge text, plus an optional digest of recent updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    pub persona: String,
    pub knowledge: String,
    pub updates: Option<String>,
}

impl Preamble {
    #[must_use]
    pub const fn new(persona: String, knowledge: String) -> Self {
        Self {
            persona,
            knowledge,
            updates: None,
        }
    }

    #[must_use]
    pub fn with_updates(mut self, updates: String) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Render the system instruction sent with every new conversation.
    #[must_use]
    pub fn system_instruction(&self) -> String {
        let mut instruction = format!(
            "{}\n\nHere is your knowledge base:\n{}",
            self.persona, self.knowledge
        );
        if let Some(updates) = &self.updates {
            instruction.push_str("\n\nRecent updates:\n");
            instruction.push_str(updates);
        }
        instruction
    }
}

/// Crude content sniff: static hosts answer missing files with an HTML page.
#[must_use]
pub fn looks_like_html(text: &str) -> bool {
    let head = text.trim_start().as_bytes();
    HTML_MARKERS.iter().any(|marker| {
        head.get(..marker.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(marker.as_bytes()))
    })
}

/// Reject documents that are HTML instead of plain text.
pub fn ensure_plain_text(resource: &str, text: String) -> Result<String, LoadError> {
    if looks_like_html(&text) {
        return Err(LoadError::Html {
            resource: resource.to_string(),
        });
    }
    Ok(text)
}
