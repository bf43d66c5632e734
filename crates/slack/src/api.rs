use std::time::Duration;

use async_trait::async_trait;
use relay_core::config::SlackConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::message::{PostMessage, SuggestedPrompts};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("slack rate limited the call (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("slack method `{method}` failed: {error}")]
    Api { method: String, error: String },
    #[error("slack returned HTTP {status}")]
    Http { status: u16 },
    #[error("slack transport error: {0}")]
    Transport(String),
    #[error("could not decode slack response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SlackApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

/// The Slack Web API methods the relay calls.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn post_message(&self, message: &PostMessage) -> Result<PostedMessage, SlackApiError>;

    async fn set_status(&self, channel_id: &str, thread_ts: &str, status: &str) -> Result<(), SlackApiError>;

    async fn set_suggested_prompts(&self, prompts: &SuggestedPrompts) -> Result<(), SlackApiError>;

    async fn set_title(&self, channel_id: &str, thread_ts: &str, title: &str) -> Result<(), SlackApiError>;
}

#[derive(Clone)]
pub struct SlackWebClient {
    client: Client,
    base_url: String,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(client: Client, base_url: &str, bot_token: SecretString) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_owned(), bot_token }
    }

    pub fn from_config(config: &SlackConfig) -> Result<Self, SlackApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| SlackApiError::Transport(error.to_string()))?;
        Ok(Self::new(client, &config.api_base_url, config.bot_token.clone()))
    }

    pub fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, payload: &T) -> Result<ApiEnvelope, SlackApiError> {
        let response = self
            .client
            .post(self.method_url(method))
            .bearer_auth(self.bot_token.expose_secret())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SlackApiError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(SlackApiError::Http { status: status.as_u16() });
        }

        let envelope: ApiEnvelope = response.json().await?;
        envelope.into_result(method)
    }
}

#[async_trait]
impl SlackApi for SlackWebClient {
    async fn post_message(&self, message: &PostMessage) -> Result<PostedMessage, SlackApiError> {
        let envelope = self.call("chat.postMessage", message).await?;
        Ok(PostedMessage {
            channel: envelope.channel.unwrap_or_else(|| message.channel.clone()),
            ts: envelope.ts.unwrap_or_default(),
        })
    }

    async fn set_status(&self, channel_id: &str, thread_ts: &str, status: &str) -> Result<(), SlackApiError> {
        let payload = json!({ "channel_id": channel_id, "thread_ts": thread_ts, "status": status });
        self.call("assistant.threads.setStatus", &payload).await.map(|_| ())
    }

    async fn set_suggested_prompts(&self, prompts: &SuggestedPrompts) -> Result<(), SlackApiError> {
        self.call("assistant.threads.setSuggestedPrompts", prompts).await.map(|_| ())
    }

    async fn set_title(&self, channel_id: &str, thread_ts: &str, title: &str) -> Result<(), SlackApiError> {
        let payload = json!({ "channel_id": channel_id, "thread_ts": thread_ts, "title": title });
        self.call("assistant.threads.setTitle", &payload).await.map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    error: Option<String>,
    channel: Option<String>,
    ts: Option<String>,
}

impl ApiEnvelope {
    fn into_result(self, method: &str) -> Result<Self, SlackApiError> {
        if self.ok {
            return Ok(self);
        }
        if self.error.as_deref() == Some("ratelimited") {
            return Err(SlackApiError::RateLimited { retry_after: None });
        }
        Err(SlackApiError::Api {
            method: method.to_owned(),
            error: self.error.unwrap_or_else(|| "unknown_error".to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiEnvelope, SlackApiError, SlackWebClient};

    fn envelope(json: &str) -> ApiEnvelope {
        serde_json::from_str(json).expect("decodes")
    }

    #[test]
    fn ok_envelope_carries_message_ts() {
        let envelope = envelope(r#"{"ok":true,"channel":"C1","ts":"1700000000.000100"}"#)
            .into_result("chat.postMessage")
            .expect("ok");
        assert_eq!(envelope.ts.as_deref(), Some("1700000000.000100"));
    }

    #[test]
    fn error_envelope_names_method_and_code() {
        let error = envelope(r#"{"ok":false,"error":"channel_not_found"}"#)
            .into_result("chat.postMessage")
            .expect_err("not ok");
        assert_eq!(
            error,
            SlackApiError::Api { method: "chat.postMessage".to_owned(), error: "channel_not_found".to_owned() }
        );
    }

    #[test]
    fn ratelimited_error_code_maps_to_rate_limited() {
        let error = envelope(r#"{"ok":false,"error":"ratelimited"}"#)
            .into_result("assistant.threads.setStatus")
            .expect_err("not ok");
        assert_eq!(error, SlackApiError::RateLimited { retry_after: None });
    }

    #[test]
    fn method_urls_join_base() {
        let client = SlackWebClient::new(
            reqwest::Client::new(),
            "https://slack.com/api/",
            String::from("xoxb-test").into(),
        );
        assert_eq!(client.method_url("chat.postMessage"), "https://slack.com/api/chat.postMessage");
    }
}
