use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GuideError, Result};
use crate::types::AnswerStyle;

/// Top-level configuration for the business guide.
///
/// Loaded from `~/.bizguide/config.toml` by default. Each section
/// corresponds to one concern of the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuideConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl GuideConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GuideConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| GuideError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Conversation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Questions longer than this many characters are rejected.
    pub max_question_chars: usize,
    /// Whether generation time is shown under each answer.
    pub show_timer: bool,
    /// Answer style used until the user picks another one.
    pub default_answer_style: AnswerStyle,
    /// Committed as the answer when streaming and fallback both fail.
    pub apology_message: String,
    /// Shown in place of an answer when streaming fails unexpectedly before
    /// any text arrived. The blocking retry follows.
    pub stream_error_message: String,
    /// Shown below a partial answer when streaming fails unexpectedly after
    /// text arrived. No retry follows.
    pub stream_interrupted_message: String,
    /// Shown when a question exceeds `max_question_chars`.
    pub too_long_message: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_question_chars: 200,
            show_timer: true,
            default_answer_style: AnswerStyle::Explanatory,
            apology_message: "Sorry, I encountered an error while generating a response. \
                              Please try again or select a different model."
                .to_string(),
            stream_error_message: "Error generating response. Retrying without streaming."
                .to_string(),
            stream_interrupted_message:
                "The response was interrupted. The answer above may be incomplete.".to_string(),
            too_long_message:
                "Your question exceeds 200 characters. Please shorten it and try again."
                    .to_string(),
        }
    }
}

/// Capability flags of one generation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCapability {
    /// Model reliably supports a plain single-shot completion call.
    pub single_shot: bool,
}

impl Default for ModelCapability {
    fn default() -> Self {
        Self { single_shot: true }
    }
}

/// Model selection and capability table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Model answering questions and, when capable, proposing follow-ups.
    pub generation_model: String,
    pub routing_model: String,
    pub grading_model: String,
    pub embedding_model: String,
    /// Substituted for follow-up generation when the generation model lacks
    /// single-shot support.
    pub followup_fallback_model: String,
    pub followup_temperature: f32,
    /// Known models and what they support. Unlisted models are assumed capable.
    pub capabilities: BTreeMap<String, ModelCapability>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let capable = [
            "llama-3.1-8b-instant",
            "llama-3.3-70b-versatile",
            "llama3-70b-8192",
            "llama3-8b-8192",
            "gpt-4o-mini",
            "gpt-4o",
        ];
        let single_shot_unreliable = [
            "mixtral-8x7b-32768",
            "gemma2-9b-it",
            "deepseek-r1-distill-llama-70b",
        ];

        let mut capabilities = BTreeMap::new();
        for model in capable {
            capabilities.insert(model.to_string(), ModelCapability { single_shot: true });
        }
        for model in single_shot_unreliable {
            capabilities.insert(model.to_string(), ModelCapability { single_shot: false });
        }

        Self {
            generation_model: "gpt-4o".to_string(),
            routing_model: "gpt-4o".to_string(),
            grading_model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            followup_fallback_model: "gpt-4o-mini".to_string(),
            followup_temperature: 0.5,
            capabilities,
        }
    }
}

impl ModelsConfig {
    /// Capability entry for `model`, defaulting to fully capable.
    pub fn capability(&self, model: &str) -> ModelCapability {
        self.capabilities.get(model).copied().unwrap_or_default()
    }

    /// Model identifiers known to the catalog, in sorted order.
    pub fn catalog(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(String::as_str)
    }
}

/// Endpoints of the remote collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the answer pipeline (`/stream` and `/invoke` are appended).
    pub pipeline_url: String,
    /// Base URL of the OpenAI-compatible chat completions API.
    pub openai_base_url: String,
    /// Per-request timeout for blocking calls, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            pipeline_url: "http://127.0.0.1:8000/guide".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            request_timeout_secs: 120,
        }
    }
}
