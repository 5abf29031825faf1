use anyhow::Result;
use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable holding the upstream API key when `llm.api_key` is empty.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ConversationConfig {
    /// Delete the orphaned checkpoint when a conversation is cleared.
    /// Off by default: old turns stay in the store, unreachable.
    #[serde(default)]
    pub purge_on_reset: bool,
}

/// Per-language overrides for the built-in coach prompts
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PromptsConfig {
    pub fr: Option<String>,
    pub ar: Option<String>,
    pub en: Option<String>,
}

impl Settings {
    /// Defaults, then `config/settings.toml` (optional), then `APP__*` env vars.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.resolve_api_key(std::env::var(API_KEY_ENV).ok());
        Ok(settings)
    }

    pub(crate) fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("llm.base_url", "https://openrouter.ai/api/v1")?
            .set_default("llm.api_key", "")?
            .set_default("llm.model", "google/gemma-3-27b-it:free")?
            .set_default("llm.temperature", 0.7)?
            .set_default("llm.max_tokens", 1000)?
            .set_default("llm.timeout_seconds", 120)?
            .set_default("conversation.purge_on_reset", false)
    }

    fn resolve_api_key(&mut self, from_env: Option<String>) {
        if !self.llm.api_key.trim().is_empty() {
            return;
        }
        match from_env.filter(|key| !key.trim().is_empty()) {
            Some(key) => self.llm.api_key = key,
            None => warn!(
                "No LLM API key configured (llm.api_key / {}), upstream calls will be rejected",
                API_KEY_ENV
            ),
        }
    }
}
