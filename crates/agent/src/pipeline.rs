use std::sync::Arc;
use std::time::Duration;

use relay_core::config::AppConfig;
use relay_core::sanitize::sanitize;
use relay_core::{
    FallbackGenerator, FormattedMessage, PipelineError, PipelineOutcome, Query, Question, ReasoningEffort,
    ResponseFormatter,
};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::llm::LlmClient;
use crate::search::{SearchClient, SearchProvider, SearchSettings};
use crate::synthesis::{AnswerSynthesizer, SynthesisSettings};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_query_chars: usize,
    pub result_count: usize,
    pub reasoning_effort: ReasoningEffort,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_query_chars: config.pipeline.max_query_chars,
            result_count: config.search.result_count,
            reasoning_effort: config.llm.reasoning_effort,
        }
    }
}

/// Upper bounds on how long one event can keep a worker busy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineBudget {
    pub search: Duration,
    pub synthesis: Duration,
    pub slack: Duration,
}

impl PipelineBudget {
    pub fn from_config(config: &AppConfig) -> Self {
        let search_retry = config.search_retry_policy();
        let search = Duration::from_secs(config.search.timeout_secs)
            .saturating_mul(search_retry.max_attempts())
            .saturating_add(search_retry.worst_case_delay());

        let synthesis_retry = config.synthesis_retry_policy();
        let synthesis = Duration::from_secs(config.llm.timeout_secs)
            .saturating_mul(synthesis_retry.max_attempts())
            .saturating_add(synthesis_retry.worst_case_delay());

        // Status set, status clear, thread title and the final post.
        let slack = Duration::from_secs(config.slack.timeout_secs).saturating_mul(4);

        Self { search, synthesis, slack }
    }

    pub fn worst_case(&self) -> Duration {
        self.search.saturating_add(self.synthesis).saturating_add(self.slack)
    }
}

/// Sanitize, search, synthesize and format one question. Never fails: any
/// stage error becomes a fallback outcome.
#[derive(Clone)]
pub struct AnswerPipeline {
    search: SearchClient,
    synthesizer: AnswerSynthesizer,
    formatter: ResponseFormatter,
    fallback: FallbackGenerator,
    settings: PipelineSettings,
}

impl AnswerPipeline {
    pub fn new(
        search: SearchClient,
        synthesizer: AnswerSynthesizer,
        formatter: ResponseFormatter,
        fallback: FallbackGenerator,
        settings: PipelineSettings,
    ) -> Self {
        Self { search, synthesizer, formatter, fallback, settings }
    }

    pub fn from_config(
        config: &AppConfig,
        search_provider: Arc<dyn SearchProvider>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self::new(
            SearchClient::new(search_provider, SearchSettings::from_config(&config.search), config.search_retry_policy()),
            AnswerSynthesizer::new(llm, SynthesisSettings::from_config(&config.llm), config.synthesis_retry_policy()),
            ResponseFormatter::new(config.format_options()),
            FallbackGenerator::new(config.fallback_table()),
            PipelineSettings::from_config(config),
        )
    }

    pub async fn run(&self, question: &Question) -> PipelineOutcome {
        let started = Instant::now();
        match self.answer(question).await {
            Ok(message) => {
                info!(
                    event_name = "pipeline.completed",
                    channel_id = %question.channel_id,
                    footnote_count = message.footnotes.len(),
                    elapsed_ms = elapsed_ms(started),
                    "pipeline produced an answer"
                );
                PipelineOutcome::Success(message)
            }
            Err(error) => {
                // Quoted back to the user, so only the single-line cleaned form is used.
                let quoted = sanitize(&question.text, self.settings.max_query_chars).unwrap_or_default();
                let outcome = self.fallback.fallback(&quoted, error.kind());
                warn!(
                    event_name = "pipeline.fallback",
                    channel_id = %question.channel_id,
                    failure_kind = %error.kind(),
                    outcome = outcome.label(),
                    elapsed_ms = elapsed_ms(started),
                    error = %error,
                    "pipeline failed; serving fallback"
                );
                outcome
            }
        }
    }

    async fn answer(&self, question: &Question) -> Result<FormattedMessage, PipelineError> {
        let query = Query::from_raw(question, self.settings.max_query_chars)?;
        let results = self.search.search(&query, self.settings.result_count).await?;
        let answer = self.synthesizer.synthesize(&query, &results, self.settings.reasoning_effort).await?;
        self.formatter.format(&answer)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_core::config::AppConfig;
    use relay_core::{
        FallbackGenerator, FormatOptions, PipelineOutcome, Question, ReasoningEffort, ResponseFormatter, RetryPolicy,
        SearchResult,
    };
    use tokio::sync::Mutex;

    use super::{AnswerPipeline, PipelineBudget, PipelineSettings};
    use crate::http::ProviderError;
    use crate::llm::{Completion, CompletionRequest, LlmClient};
    use crate::search::{SearchClient, SearchProvider, SearchRequest, SearchSettings};
    use crate::synthesis::{AnswerSynthesizer, SynthesisSettings};

    struct ScriptedSearch {
        responses: Mutex<VecDeque<Result<Vec<SearchResult>, ProviderError>>>,
    }

    #[async_trait]
    impl SearchProvider for ScriptedSearch {
        async fn search(&self, _request: &SearchRequest) -> Result<Vec<SearchResult>, ProviderError> {
            self.responses.lock().await.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct ScriptedLlm {
        responses: Mutex<VecDeque<Result<Completion, ProviderError>>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, ProviderError> {
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::status(500, "script exhausted")))
        }
    }

    fn pipeline(
        search: Vec<Result<Vec<SearchResult>, ProviderError>>,
        llm: Vec<Result<Completion, ProviderError>>,
    ) -> AnswerPipeline {
        let no_jitter = RetryPolicy { jitter: false, ..RetryPolicy::default() };
        AnswerPipeline::new(
            SearchClient::new(
                Arc::new(ScriptedSearch { responses: Mutex::new(search.into()) }),
                SearchSettings { context_term: "Dataiku".to_owned(), ..SearchSettings::default() },
                no_jitter.clone(),
            ),
            AnswerSynthesizer::new(
                Arc::new(ScriptedLlm { responses: Mutex::new(llm.into()) }),
                SynthesisSettings {
                    model: "o4-mini".to_owned(),
                    max_completion_tokens: 1500,
                    call_timeout: Duration::from_secs(30),
                },
                no_jitter.with_max_retries(1),
            ),
            ResponseFormatter::new(FormatOptions::default()),
            FallbackGenerator::default(),
            PipelineSettings { max_query_chars: 1000, result_count: 5, reasoning_effort: ReasoningEffort::Medium },
        )
    }

    fn question(text: &str) -> Question {
        Question {
            text: text.to_owned(),
            channel_id: "C1".to_owned(),
            thread_ts: Some("1.0".to_owned()),
            user_id: "U1".to_owned(),
        }
    }

    fn stub_results() -> Vec<SearchResult> {
        vec![
            SearchResult::new("Visual recipes", "Create one from the Flow", "https://doc.example.com/visual-recipes", 1)
                .expect("valid"),
            SearchResult::new("Recipes overview", "All recipe kinds", "https://doc.example.com/recipes", 2)
                .expect("valid"),
        ]
    }

    fn answer(text: &str) -> Result<Completion, ProviderError> {
        Ok(Completion { text: text.to_owned(), finish_reason: Some("stop".to_owned()) })
    }

    #[tokio::test]
    async fn visual_recipe_question_gets_single_footnote() {
        let pipeline = pipeline(
            vec![Ok(stub_results())],
            vec![answer("Open your Flow, click *+ Recipe* and pick a visual recipe [1].")],
        );

        let outcome = pipeline.run(&question("How do I create a visual recipe?")).await;

        let PipelineOutcome::Success(message) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(message.footnotes.len(), 1);
        assert_eq!(message.footnotes[0].number, 1);
        assert_eq!(message.footnotes[0].url, "https://doc.example.com/visual-recipes");
        assert!(message.body.contains("<https://doc.example.com/visual-recipes|[1]>"));
        assert!(message.suppress_link_previews);
        assert!(!message.degraded);
    }

    #[tokio::test]
    async fn answer_without_markers_is_posted_unchanged() {
        let text = "Visual recipes are created from the Flow.";
        let pipeline = pipeline(vec![Ok(stub_results())], vec![answer(text)]);

        let message = pipeline.run(&question("visual recipe?")).await.into_message();

        assert_eq!(message.body, text);
        assert!(message.footnotes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn search_outage_falls_back_to_matching_topic() {
        let outage = || Err(ProviderError::status(503, "unavailable"));
        let pipeline = pipeline(vec![outage(), outage(), outage()], Vec::new());

        let outcome = pipeline.run(&question("My dataset connection is broken")).await;

        let PipelineOutcome::PartialFailure(message) = outcome else {
            panic!("expected partial failure, got {outcome:?}");
        };
        assert!(message.degraded);
        assert!(message.body.contains("datasets and connections"));
    }

    #[tokio::test]
    async fn synthesis_failure_without_topic_is_total_failure() {
        let pipeline = pipeline(vec![Ok(stub_results())], vec![Err(ProviderError::status(500, "oops"))]);

        let outcome = pipeline.run(&question("what are flow zones")).await;

        assert!(matches!(outcome, PipelineOutcome::TotalFailure(ref text) if text.contains("what are flow zones")));
    }

    #[tokio::test]
    async fn fallback_quotes_the_cleaned_question() {
        let pipeline = pipeline(vec![Ok(stub_results())], vec![Err(ProviderError::status(500, "oops"))]);

        let outcome = pipeline.run(&question("what are\n\n  flow\u{200B} zones\t?")).await;

        let PipelineOutcome::TotalFailure(text) = outcome else {
            panic!("expected total failure, got {outcome:?}");
        };
        assert!(text.contains("*Your query:* `what are flow zones ?`"), "got {text}");
        assert!(!text.contains('\u{200B}'));
    }

    #[tokio::test]
    async fn blank_question_gets_rephrase_guidance() {
        let pipeline = pipeline(Vec::new(), Vec::new());
        let message = pipeline.run(&question("  \u{200B} ")).await.into_message();
        assert!(message.body.contains("couldn't find a question"));
    }

    #[tokio::test]
    async fn no_results_get_search_tips() {
        let pipeline = pipeline(vec![Ok(Vec::new())], Vec::new());
        let message = pipeline.run(&question("zzqx plugin")).await.into_message();
        assert!(message.body.starts_with("I couldn't find any relevant information"));
    }

    #[test]
    fn worst_case_budget_adds_every_stage() {
        let mut config = AppConfig::default();
        config.retry.jitter = false;
        let budget = PipelineBudget::from_config(&config);

        assert_eq!(budget.search, Duration::from_secs(8 * 3 + 20));
        assert_eq!(budget.synthesis, Duration::from_secs(30 * 2 + 10));
        assert_eq!(budget.slack, Duration::from_secs(40));
        assert_eq!(budget.worst_case(), Duration::from_secs(44 + 70 + 40));
    }
}
