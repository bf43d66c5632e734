use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::sanitize;

/// A question as extracted from an inbound event, before sanitisation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub channel_id: String,
    pub thread_ts: Option<String>,
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub original: String,
    pub sanitized: String,
    pub channel_id: String,
    pub thread_ts: Option<String>,
    pub user_id: String,
}

impl Query {
    pub fn from_raw(question: &Question, max_chars: usize) -> Result<Self, PipelineError> {
        let sanitized = sanitize::sanitize(&question.text, max_chars)?;
        Ok(Self {
            original: question.text.clone(),
            sanitized,
            channel_id: question.channel_id.clone(),
            thread_ts: question.thread_ts.clone(),
            user_id: question.user_id.clone(),
        })
    }

    /// Terms suitable for a web search API.
    pub fn search_terms(&self) -> String {
        sanitize::search_terms(&self.sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::{Query, Question};
    use crate::errors::FailureKind;

    fn question(text: &str) -> Question {
        Question {
            text: text.to_owned(),
            channel_id: "C123".to_owned(),
            thread_ts: Some("1700000000.000100".to_owned()),
            user_id: "U42".to_owned(),
        }
    }

    #[test]
    fn from_raw_keeps_original_and_routing_fields() {
        let query = Query::from_raw(&question("  How do I\tcreate a visual recipe?\n"), 1000)
            .expect("valid query");

        assert_eq!(query.sanitized, "How do I create a visual recipe?");
        assert_eq!(query.original, "  How do I\tcreate a visual recipe?\n");
        assert_eq!(query.channel_id, "C123");
        assert_eq!(query.thread_ts.as_deref(), Some("1700000000.000100"));
    }

    #[test]
    fn blank_question_is_invalid() {
        let error = Query::from_raw(&question(" \n\t "), 1000).expect_err("blank must fail");
        assert_eq!(error.kind(), FailureKind::InvalidQuery);
    }

    #[test]
    fn search_terms_drop_punctuation() {
        let query = Query::from_raw(&question("What's a *join* recipe?"), 1000).expect("valid");
        assert_eq!(query.search_terms(), "What s a join recipe");
    }
}
