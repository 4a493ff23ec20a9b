//! Prompt templates with placeholders for page text.

use serde::{Deserialize, Serialize};

pub const SELECTED_TEXT_TOKEN: &str = "{selectedText}";
pub const SURROUNDING_TEXT_TOKEN: &str = "{surroundingText}";

const LEGACY_SELECTED_MARKER: &str = "[SELECTED TEXT]";
const LEGACY_SURROUNDING_MARKER: &str = "[SURROUNDING TEXT]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub content: String,
}

impl Template {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Ad hoc template built from whatever the user typed into the picker.
    pub fn custom(query: &str) -> Self {
        Self {
            name: query.to_string(),
            content: format!("{}:\n{}", query, SELECTED_TEXT_TOKEN),
        }
    }

    /// Substitute the first occurrence of each placeholder.
    pub fn render(&self, selected_text: &str, surrounding_text: &str) -> String {
        self.content
            .replacen(SELECTED_TEXT_TOKEN, selected_text, 1)
            .replacen(SURROUNDING_TEXT_TOKEN, surrounding_text, 1)
    }

    /// Popup title for a session opened from this template.
    pub fn header(&self, selected_text: &str) -> String {
        format!("{}: {}", self.name, selected_text)
    }

    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty()
    }
}

/// One word or marker of a block-built template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyBlock {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

/// Template format written by the old drag-and-drop builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyTemplate {
    pub name: String,
    pub blocks: Vec<LegacyBlock>,
}

impl From<LegacyTemplate> for Template {
    fn from(legacy: LegacyTemplate) -> Self {
        let content = legacy
            .blocks
            .iter()
            .map(|b| match b.content.as_str() {
                LEGACY_SELECTED_MARKER => SELECTED_TEXT_TOKEN,
                LEGACY_SURROUNDING_MARKER => SURROUNDING_TEXT_TOKEN,
                other => other,
            })
            .collect::<Vec<_>>()
            .join(" ");
        Template {
            name: legacy.name,
            content,
        }
    }
}

/// Either template format as found in storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredTemplate {
    Content(Template),
    Blocks(LegacyTemplate),
}

impl From<StoredTemplate> for Template {
    fn from(stored: StoredTemplate) -> Self {
        match stored {
            StoredTemplate::Content(t) => t,
            StoredTemplate::Blocks(legacy) => legacy.into(),
        }
    }
}

/// Templates seeded on first install.
pub fn default_templates() -> Vec<Template> {
    vec![
        Template::new(
            "Explain",
            format!(
                "Provide concise, complete and simple explanation of:\n{}",
                SELECTED_TEXT_TOKEN
            ),
        ),
        Template::new(
            "Explain in context",
            format!(
                "Provide concise, complete and simple explanation of:\n{}\n\nYou might use this:\n{}",
                SELECTED_TEXT_TOKEN, SURROUNDING_TEXT_TOKEN
            ),
        ),
        Template::new(
            "Translate to Polish",
            format!(
                "Przetłumacz \"{}\" na polski. Możesz użyć tego:\n{}",
                SELECTED_TEXT_TOKEN, SURROUNDING_TEXT_TOKEN
            ),
        ),
    ]
}
