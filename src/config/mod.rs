//! Configuration management for the voice bot
//!
//! Settings are a single JSON document (camelCase keys) persisted by
//! [`SettingsStore`]. Every field has a default so partial documents overlay
//! the compiled-in defaults.

pub mod store;

pub use store::SettingsStore;

use serde::{Deserialize, Serialize};

use crate::completion::StreamingPolicy;
use crate::stages::{CommandMarkers, Stage};
use crate::{Error, Result};

/// Default chat-completion endpoint
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Model used when the settings leave it blank
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Stage table compiled into the binary
const DEFAULT_STAGES: &str = include_str!("../../defaults/stages.json");

/// Bot settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Chat-completion endpoint URL
    pub api_url: String,

    /// Bearer credential for the endpoint
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Response length cap
    #[serde(rename = "max_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Instruction used when the current stage has none
    pub system_prompt: String,

    /// Spoken on start
    pub greeting_text: String,

    /// BCP-47 language code for recognition and synthesis
    pub language: String,

    /// Prefer streamed responses when the endpoint supports them
    pub use_streaming: bool,

    /// Filler phrases spoken after a period of inactivity
    pub waiting_phrases: Vec<String>,

    /// Inactivity threshold before an idle phrase, in milliseconds
    pub waiting_interval: u64,

    /// Scripted stage table
    pub conversation_stages: Vec<Stage>,

    /// How to decide streaming support for hosts not in the known list
    pub streaming_policy: StreamingPolicy,

    /// Hosts known to support streamed responses
    pub known_streaming_hosts: Vec<String>,

    /// Marker tokens for spoken stage-jump commands
    pub command_markers: CommandMarkers,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: "Ты дружелюбный голосовой помощник. Отвечай кратко, одним-двумя предложениями."
                .to_string(),
            greeting_text: "Здравствуйте! Я голосовой робот-демонстратор. Чем могу помочь?"
                .to_string(),
            language: "ru-RU".to_string(),
            use_streaming: true,
            waiting_phrases: vec![
                "Я вас слушаю.".to_string(),
                "Есть ли у вас вопросы?".to_string(),
                "Могу рассказать о своих возможностях.".to_string(),
            ],
            waiting_interval: 30_000,
            conversation_stages: default_stages(),
            streaming_policy: StreamingPolicy::default(),
            known_streaming_hosts: vec!["api.openai.com".to_string()],
            command_markers: CommandMarkers::default(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_url", &self.api_url)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("language", &self.language)
            .field("use_streaming", &self.use_streaming)
            .field("waiting_interval", &self.waiting_interval)
            .field("stages", &self.conversation_stages.len())
            .field("streaming_policy", &self.streaming_policy)
            .finish_non_exhaustive()
    }
}

/// Parse the compiled-in stage table
fn default_stages() -> Vec<Stage> {
    serde_json::from_str(DEFAULT_STAGES).unwrap_or_else(|e| {
        tracing::error!(error = %e, "embedded stage table is invalid");
        Vec::new()
    })
}

impl Settings {
    /// Apply environment overrides
    ///
    /// `STAGEBOT_API_KEY` wins over `OPENAI_API_KEY`.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("STAGEBOT_API_URL") {
            self.api_url = url;
        }

        if let Some(key) = std::env::var("STAGEBOT_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
        {
            self.api_key = key;
        }

        if let Ok(model) = std::env::var("STAGEBOT_MODEL") {
            self.model = model;
        }

        if let Ok(language) = std::env::var("STAGEBOT_LANGUAGE") {
            self.language = language;
        }
    }

    /// Merge a JSON object over these settings
    ///
    /// Top-level keys present in `json` replace the current values; absent
    /// keys are kept. Nothing changes when the document is invalid.
    ///
    /// # Errors
    ///
    /// Returns error if `json` is not a JSON object or does not fit the schema
    pub fn update_from_json(&mut self, json: &str) -> Result<()> {
        let patch: serde_json::Value = serde_json::from_str(json)?;
        let serde_json::Value::Object(patch) = patch else {
            return Err(Error::Config("settings must be a JSON object".to_string()));
        };

        let mut current = serde_json::to_value(&*self)?;
        if let serde_json::Value::Object(fields) = &mut current {
            fields.extend(patch);
        }

        *self = serde_json::from_value(current)?;
        tracing::debug!("settings updated");
        Ok(())
    }

    /// Model identifier, falling back to the default when blank
    #[must_use]
    pub fn model_or_default(&self) -> &str {
        if self.model.trim().is_empty() {
            DEFAULT_MODEL
        } else {
            &self.model
        }
    }

    /// Instruction for a stage, or the general system prompt
    #[must_use]
    pub fn instruction_for(&self, stage_number: u32) -> &str {
        crate::stages::find_stage(&self.conversation_stages, stage_number)
            .map_or(self.system_prompt.as_str(), |s| s.speech_prompt.as_str())
    }

    /// Idle threshold as a duration
    #[must_use]
    pub const fn waiting_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.waiting_interval)
    }
}
