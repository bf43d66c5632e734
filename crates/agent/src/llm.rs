use std::time::Duration;

use async_trait::async_trait;
use relay_core::config::LlmConfig;
use relay_core::ReasoningEffort;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::http::{error_from_response, ProviderError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_completion_tokens: u32,
    pub reasoning_effort: ReasoningEffort,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: Option<String>,
}

impl Completion {
    pub fn hit_token_limit(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;
}

/// Chat-completions client for OpenAI-compatible reasoning models.
#[derive(Clone)]
pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
}

impl OpenAiChatClient {
    pub fn new(client: Client, base_url: &str, api_key: SecretString) -> Self {
        Self { client, endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')), api_key }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;
        Ok(Self::new(client, &config.base_url, config.api_key.clone()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|error| ProviderError::Decode(error.to_string()))?;
        Ok(extract_completion(parsed))
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn extract_completion(response: ChatCompletionResponse) -> Completion {
    match response.choices.into_iter().next() {
        Some(choice) => Completion {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        },
        None => Completion { text: String::new(), finish_reason: None },
    }
}
