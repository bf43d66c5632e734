use std::time::Duration;

use reqwest::header::HeaderValue;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// Failure of a single outbound provider call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {status}: {message}")]
    Status { status: u16, message: String, retry_after: Option<Duration> },
    #[error("could not decode upstream response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into(), retry_after: None }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::Status { status: 429, message: "rate limited".to_owned(), retry_after }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status { status, .. } => is_retryable_status(*status),
            Self::Decode(_) => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else if error.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Rate limits and transient gateway failures. 501 and 505 describe a request
/// the server will never accept, so they are not retried.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Only the delay-seconds form of `Retry-After` is honoured.
pub fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Converts a non-success response into a `ProviderError`, keeping the
/// upstream error message when the body carries one.
pub async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
    let body = response.text().await.unwrap_or_default();
    map_http_error(status, &body, retry_after)
}

fn map_http_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> ProviderError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(ErrorEnvelope::into_message)
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_owned()
            } else {
                trimmed.chars().take(200).collect()
            }
        });

    ProviderError::Status { status: status.as_u16(), message, retry_after }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed { message: Option<String>, detail: Option<String> },
    Plain(String),
}

impl ErrorEnvelope {
    fn into_message(self) -> Option<String> {
        match self.error {
            Some(ErrorBody::Detailed { message, detail }) => message.or(detail),
            Some(ErrorBody::Plain(message)) => Some(message),
            None => self.message,
        }
    }
}
