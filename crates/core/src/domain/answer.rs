use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::search::SearchResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based index into the results sent to the model.
    pub index: usize,
    pub result: SearchResult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerProvenance {
    Synthesized,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    pub text: String,
    /// Ordered by first appearance of the marker in `text`.
    pub citations: Vec<Citation>,
    pub provenance: AnswerProvenance,
    /// Set when the model stopped because it ran out of completion tokens.
    pub truncated: bool,
}

impl SynthesizedAnswer {
    pub fn synthesized(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self { text: text.into(), citations, provenance: AnswerProvenance::Synthesized, truncated: false }
    }

    pub fn citation(&self, index: usize) -> Option<&Citation> {
        self.citations.iter().find(|citation| citation.index == index)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("unsupported reasoning effort `{value}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Citation, ReasoningEffort, SynthesizedAnswer};
    use crate::domain::search::SearchResult;

    #[test]
    fn reasoning_effort_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<ReasoningEffort>(), Ok(ReasoningEffort::High));
        assert_eq!(" low ".parse::<ReasoningEffort>(), Ok(ReasoningEffort::Low));
        assert!("extreme".parse::<ReasoningEffort>().is_err());
        assert_eq!(ReasoningEffort::default(), ReasoningEffort::Medium);
    }

    #[test]
    fn citation_lookup_uses_marker_index_not_position() {
        let result = SearchResult::new("Recipes", "", "https://doc.example.com/r", 3)
            .expect("valid result");
        let answer = SynthesizedAnswer::synthesized(
            "Use a Prepare recipe [3].",
            vec![Citation { index: 3, result }],
        );

        assert!(answer.citation(1).is_none());
        assert_eq!(answer.citation(3).map(|c| c.result.rank), Some(3));
    }
}
