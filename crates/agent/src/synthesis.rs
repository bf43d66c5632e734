use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use relay_core::config::LlmConfig;
use relay_core::{AnswerProvenance, Citation, PipelineError, Query, ReasoningEffort, RetryPolicy, SearchResult, SynthesizedAnswer};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::http::ProviderError;
use crate::llm::{ChatMessage, Completion, CompletionRequest, LlmClient};

/// Delay before the single rate-limit retry when upstream sends no hint.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(2);

pub const SYSTEM_PROMPT: &str = "You are a helpful Dataiku expert assistant answering questions in Slack.

Formatting rules for Slack:
- Use *bold* with single asterisks, never double asterisks.
- Use bullet points with • or -.
- Keep the answer focused and under 800 words.
- Use line breaks between sections.

Citation rules:
- Cite sources with their number in square brackets, for example [1] or [2].
- Only cite numbers that appear in the provided search results.
- Never invent URLs and do not write a references or sources section.

Answer from the search results. If they do not cover the question, say so and give general Dataiku guidance.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesisSettings {
    pub model: String,
    pub max_completion_tokens: u32,
    pub call_timeout: Duration,
}

impl SynthesisSettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_completion_tokens: config.max_completion_tokens,
            call_timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Produces a cited answer from search results with one reasoning-model call.
#[derive(Clone)]
pub struct AnswerSynthesizer {
    client: Arc<dyn LlmClient>,
    settings: SynthesisSettings,
    retry: RetryPolicy,
}

impl AnswerSynthesizer {
    pub fn new(client: Arc<dyn LlmClient>, settings: SynthesisSettings, retry: RetryPolicy) -> Self {
        Self { client, settings, retry }
    }

    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn build_request(
        &self,
        query: &Query,
        results: &[SearchResult],
        effort: ReasoningEffort,
    ) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt(query, results))],
            max_completion_tokens: self.settings.max_completion_tokens,
            reasoning_effort: effort,
        }
    }

    pub async fn synthesize(
        &self,
        query: &Query,
        results: &[SearchResult],
        effort: ReasoningEffort,
    ) -> Result<SynthesizedAnswer, PipelineError> {
        let request = self.build_request(query, results, effort);
        let completion = self.complete_with_retry(&request).await?;

        if completion.text.trim().is_empty() {
            warn!(event_name = "pipeline.synthesis.empty", "model returned an empty answer");
            return Err(PipelineError::SynthesisUnavailable { detail: "model returned no content".to_owned() });
        }

        let truncated = completion.hit_token_limit();
        if truncated {
            warn!(
                event_name = "pipeline.synthesis.truncated",
                max_completion_tokens = self.settings.max_completion_tokens,
                "model stopped at completion token limit"
            );
        }

        let (text, citations) = extract_citations(&completion.text, results);
        info!(
            event_name = "pipeline.synthesis.completed",
            citation_count = citations.len(),
            reasoning_effort = %effort,
            "answer synthesized"
        );

        Ok(SynthesizedAnswer { text, citations, provenance: AnswerProvenance::Synthesized, truncated })
    }

    async fn complete_with_retry(&self, request: &CompletionRequest) -> Result<Completion, PipelineError> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = match timeout(self.settings.call_timeout, self.client.complete(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(self.settings.call_timeout)),
            };

            match outcome {
                Ok(completion) => return Ok(completion),
                Err(error) if error.is_rate_limited() && attempt < max_attempts => {
                    let hint = error.retry_after().unwrap_or(DEFAULT_RATE_LIMIT_DELAY);
                    let delay = self.retry.delay_for(attempt - 1, Some(hint));
                    warn!(
                        event_name = "pipeline.synthesis.retrying",
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "model rate limited; retrying once"
                    );
                    sleep(delay).await;
                }
                Err(error) => {
                    warn!(event_name = "pipeline.synthesis.failed", attempt, error = %error, "synthesis failed");
                    return Err(PipelineError::SynthesisUnavailable { detail: error.to_string() });
                }
            }
        }
    }
}

fn user_prompt(query: &Query, results: &[SearchResult]) -> String {
    let context = results
        .iter()
        .enumerate()
        .map(|(position, result)| {
            format!(
                "[{}] Title: {}\nContent: {}\nURL: {}",
                position + 1,
                result.display_title(),
                result.snippet.trim(),
                result.url
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Search results:\n\n{context}\n\nQuestion: {}\n\n\
         Answer the question using the search results above and cite them with [n].",
        query.sanitized
    )
}

/// Keeps markers that point into `results`, ordered by first appearance, and
/// strips the rest from the text.
pub fn extract_citations(text: &str, results: &[SearchResult]) -> (String, Vec<Citation>) {
    let mut cleaned = String::with_capacity(text.len());
    let mut citations: Vec<Citation> = Vec::new();
    let mut cursor = 0;

    for captures in marker_pattern().captures_iter(text) {
        let (Some(whole), Some(digits)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        // `[n](url)` is a markdown link label, not a citation.
        if text[whole.end()..].starts_with('(') {
            continue;
        }
        cleaned.push_str(&text[cursor..whole.start()]);
        cursor = whole.end();

        let index = digits.as_str().parse::<usize>().unwrap_or(0);
        match index.checked_sub(1).and_then(|position| results.get(position)) {
            Some(result) => {
                cleaned.push_str(whole.as_str());
                if !citations.iter().any(|citation| citation.index == index) {
                    citations.push(Citation { index, result: result.clone() });
                }
            }
            None => {
                if cleaned.ends_with(' ') {
                    cleaned.pop();
                }
            }
        }
    }
    cleaned.push_str(&text[cursor..]);

    (cleaned, citations)
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d{1,3})\]").expect("valid citation marker regex"))
}
