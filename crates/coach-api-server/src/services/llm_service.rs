use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::services::conversation::LlmProvider;
use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Failed to call LLM API: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM API error: {status} - {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to parse LLM response: {0}")]
    Decode(String),

    #[error("No choices returned from LLM")]
    EmptyChoices,
}

/// OpenAI-compatible chat completions client (OpenRouter by default)
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        debug!(
            "Calling {} with {} messages (model={})",
            self.completions_url(),
            messages.len(),
            self.config.model
        );

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let body = response.text().await?;
        let completion: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or(LlmError::EmptyChoices)
    }
}

#[async_trait::async_trait]
impl LlmProvider for LlmService {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        Ok(self.generate_chat(messages).await?)
    }
}
