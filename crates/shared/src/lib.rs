pub mod template;
pub mod wire;

pub mod settings {
    use serde::{Deserialize, Serialize};

    fn default_chars_window() -> usize {
        1000
    }

    fn default_popup_width() -> f32 {
        400.0
    }

    fn default_popup_margin() -> f32 {
        28.0
    }

    fn default_greeting_prompt() -> String {
        "Greet the user in one short sentence and ask how you can help.".to_string()
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct ProviderAuth {
        pub api_key: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelProvider {
        pub provider_preference: Vec<String>, // e.g., ["openai", "local"]
        pub openai_model: String,             // e.g., "gpt-4o"
        #[serde(default)]
        pub openai_base_url: Option<String>,
        #[serde(default)]
        pub openai_auth: ProviderAuth,
        pub local_model: String, // e.g., "llama3.2:3b" for Ollama
    }

    /// Size of the plain-text window captured around a selection.
    #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
    pub struct SelectionSettings {
        #[serde(default = "default_chars_window")]
        pub chars_before: usize,
        #[serde(default = "default_chars_window")]
        pub chars_after: usize,
    }

    impl Default for SelectionSettings {
        fn default() -> Self {
            Self {
                chars_before: default_chars_window(),
                chars_after: default_chars_window(),
            }
        }
    }

    /// Placement of chat popups opened from the toolbar icon.
    #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
    pub struct PopupSettings {
        #[serde(default = "default_popup_width")]
        pub width: f32,
        #[serde(default = "default_popup_margin")]
        pub right_margin: f32,
    }

    impl Default for PopupSettings {
        fn default() -> Self {
            Self {
                width: default_popup_width(),
                right_margin: default_popup_margin(),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AppSettings {
        #[serde(default)]
        pub model: ModelProvider,
        #[serde(default)]
        pub selection: SelectionSettings,
        #[serde(default)]
        pub popup: PopupSettings,
        /// System instruction used when the assistant opens a conversation.
        #[serde(default = "default_greeting_prompt")]
        pub greeting_prompt: String,
        /// Overrides the location of the template store.
        #[serde(default)]
        pub templates_path: Option<String>,
    }

    impl Default for ModelProvider {
        fn default() -> Self {
            Self {
                provider_preference: vec!["openai".into(), "local".into()], // Cloud first, local fallback
                openai_model: "gpt-4o".into(),
                openai_base_url: None,
                openai_auth: ProviderAuth::default(),
                local_model: "llama3.2:3b".into(),
            }
        }
    }

    impl Default for AppSettings {
        fn default() -> Self {
            Self {
                model: ModelProvider::default(),
                selection: SelectionSettings::default(),
                popup: PopupSettings::default(),
                greeting_prompt: default_greeting_prompt(),
                templates_path: None,
            }
        }
    }

}

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String, // "system" | "user" | "assistant"
        pub content: String,
    }

    impl ChatMessage {
        pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
            Self {
                role: role.into(),
                content: content.into(),
            }
        }
    }

    /// One decoded piece of a provider's streaming response.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StreamChunk {
        Text(String),
        Done { stop_reason: Option<String> },
        Error(String),
    }
}
