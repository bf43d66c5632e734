use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footnote {
    pub number: usize,
    pub url: String,
    pub title: String,
}

/// A reply ready to post, already in Slack mrkdwn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedMessage {
    pub body: String,
    pub footnotes: Vec<Footnote>,
    pub suppress_link_previews: bool,
    /// True when the content did not come from a successful synthesis.
    pub degraded: bool,
}

impl FormattedMessage {
    pub fn plain(body: impl Into<String>) -> Self {
        Self { body: body.into(), footnotes: Vec::new(), suppress_link_previews: true, degraded: false }
    }

    pub fn degraded(body: impl Into<String>) -> Self {
        Self { degraded: true, ..Self::plain(body) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    Success(FormattedMessage),
    PartialFailure(FormattedMessage),
    TotalFailure(String),
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::PartialFailure(_) => "partial_failure",
            Self::TotalFailure(_) => "total_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Every outcome yields exactly one postable message.
    pub fn into_message(self) -> FormattedMessage {
        match self {
            Self::Success(message) | Self::PartialFailure(message) => message,
            Self::TotalFailure(text) => FormattedMessage::degraded(text),
        }
    }
}
