use thiserror::Error;

/// Coarse classification of a pipeline failure, used to pick a fallback and
/// to tag log lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidQuery,
    NoSearchResults,
    SearchUnavailable,
    SynthesisUnavailable,
    MalformedAnswer,
    PostFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidQuery => "invalid_query",
            Self::NoSearchResults => "no_search_results",
            Self::SearchUnavailable => "search_unavailable",
            Self::SynthesisUnavailable => "synthesis_unavailable",
            Self::MalformedAnswer => "malformed_answer",
            Self::PostFailed => "post_failed",
        }
    }

    /// Upstream conditions that were retried locally before surfacing.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::SearchUnavailable | Self::SynthesisUnavailable)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("search returned no usable results")]
    NoSearchResults,
    #[error("search unavailable after {attempts} attempt(s): {detail}")]
    SearchUnavailable { attempts: u32, last_status: Option<u16>, detail: String },
    #[error("synthesis unavailable: {detail}")]
    SynthesisUnavailable { detail: String },
    #[error("malformed answer: {0}")]
    MalformedAnswer(String),
    #[error("failed to post message: {0}")]
    PostFailed(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidQuery(_) => FailureKind::InvalidQuery,
            Self::NoSearchResults => FailureKind::NoSearchResults,
            Self::SearchUnavailable { .. } => FailureKind::SearchUnavailable,
            Self::SynthesisUnavailable { .. } => FailureKind::SynthesisUnavailable,
            Self::MalformedAnswer(_) => FailureKind::MalformedAnswer,
            Self::PostFailed(_) => FailureKind::PostFailed,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => {
                "I couldn't find a question in that message. Try rephrasing it."
            }
            Self::NoSearchResults => "I couldn't find any relevant information about that.",
            Self::SearchUnavailable { .. } | Self::SynthesisUnavailable { .. } => {
                "I'm having trouble reaching external services. Please try again shortly."
            }
            Self::MalformedAnswer(_) | Self::PostFailed(_) => {
                "I ran into a problem preparing the answer. Please try again."
            }
        }
    }
}
