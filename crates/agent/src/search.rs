use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::config::SearchConfig;
use relay_core::{PipelineError, Query, RetryPolicy, SearchResult, MAX_SEARCH_RESULTS};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::http::{error_from_response, ProviderError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    #[serde(rename = "q")]
    pub query: String,
    pub count: usize,
    #[serde(rename = "source")]
    pub source_filter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, ProviderError>;
}

/// Brave web search API.
#[derive(Clone)]
pub struct BraveSearchProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl BraveSearchProvider {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self { client, base_url: base_url.into(), api_key }
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;
        Ok(Self::new(client, config.base_url.clone(), config.api_key.clone()))
    }
}

#[async_trait]
impl SearchProvider for BraveSearchProvider {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, ProviderError> {
        let response = self
            .client
            .get(&self.base_url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", self.api_key.expose_secret())
            .query(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: BraveResponse =
            response.json().await.map_err(|error| ProviderError::Decode(error.to_string()))?;
        Ok(collect_results(body))
    }
}

#[derive(Debug, Default, Deserialize)]
struct BraveResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Default, Deserialize)]
struct BraveWebResults {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
}

fn collect_results(body: BraveResponse) -> Vec<SearchResult> {
    let raw = body.web.map(|web| web.results).unwrap_or_default();
    raw.into_iter()
        .enumerate()
        .filter_map(|(position, result)| {
            let rank = u32::try_from(position + 1).unwrap_or(u32::MAX);
            let url = result.url.clone();
            let parsed = SearchResult::new(result.title, result.description, result.url, rank);
            if parsed.is_none() {
                warn!(
                    event_name = "pipeline.search.result_skipped",
                    rank,
                    url = %url,
                    "skipping search result with malformed url"
                );
            }
            parsed
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchSettings {
    pub attempt_timeout: Duration,
    pub context_term: String,
    pub source_filter: String,
    pub freshness: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(8),
            context_term: String::new(),
            source_filter: "web".to_owned(),
            freshness: None,
        }
    }
}

impl SearchSettings {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(config.timeout_secs),
            context_term: config.context_term.trim().to_owned(),
            source_filter: config.source_filter.clone(),
            freshness: config.freshness.clone(),
        }
    }
}

/// Runs a search with per-attempt timeouts and bounded retries.
#[derive(Clone)]
pub struct SearchClient {
    provider: Arc<dyn SearchProvider>,
    settings: SearchSettings,
    retry: RetryPolicy,
}

impl SearchClient {
    pub fn new(provider: Arc<dyn SearchProvider>, settings: SearchSettings, retry: RetryPolicy) -> Self {
        Self { provider, settings, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn build_request(&self, query: &Query, result_count: usize) -> Result<SearchRequest, PipelineError> {
        let terms = query.search_terms();
        if terms.is_empty() {
            return Err(PipelineError::InvalidQuery("question has no searchable terms".to_owned()));
        }

        let context = &self.settings.context_term;
        let query_text = if context.is_empty() || terms.to_lowercase().contains(&context.to_lowercase()) {
            terms
        } else {
            format!("{terms} {context}")
        };

        Ok(SearchRequest {
            query: query_text,
            count: result_count.clamp(1, MAX_SEARCH_RESULTS),
            source_filter: self.settings.source_filter.clone(),
            freshness: self.settings.freshness.clone(),
        })
    }

    pub async fn search(&self, query: &Query, result_count: usize) -> Result<Vec<SearchResult>, PipelineError> {
        let request = self.build_request(query, result_count)?;
        let max_attempts = self.retry.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = match timeout(self.settings.attempt_timeout, self.provider.search(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(self.settings.attempt_timeout)),
            };

            let error = match outcome {
                Ok(mut results) => {
                    results.sort_by_key(|result| result.rank);
                    results.truncate(request.count);
                    if results.is_empty() {
                        info!(event_name = "pipeline.search.empty", attempt, "search returned no results");
                        return Err(PipelineError::NoSearchResults);
                    }
                    info!(
                        event_name = "pipeline.search.completed",
                        attempt,
                        result_count = results.len(),
                        "search completed"
                    );
                    return Ok(results);
                }
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                warn!(
                    event_name = "pipeline.search.failed",
                    attempt,
                    retryable = error.is_retryable(),
                    error = %error,
                    "search failed"
                );
                return Err(PipelineError::SearchUnavailable {
                    attempts: attempt,
                    last_status: error.http_status(),
                    detail: error.to_string(),
                });
            }

            let delay = self.retry.delay_for(attempt - 1, error.retry_after());
            warn!(
                event_name = "pipeline.search.retrying",
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "search attempt failed; retrying"
            );
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_core::{PipelineError, Query, Question, RetryPolicy, SearchResult};
    use serde_json::json;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    use super::{collect_results, BraveResponse, SearchClient, SearchProvider, SearchRequest, SearchSettings};
    use crate::http::ProviderError;

    struct ScriptedProvider {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        responses: VecDeque<Result<Vec<SearchResult>, ProviderError>>,
        calls: Vec<(Instant, SearchRequest)>,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn with_script(responses: Vec<Result<Vec<SearchResult>, ProviderError>>) -> Self {
            Self { state: Mutex::new(ScriptedState { responses: responses.into(), ..ScriptedState::default() }) }
        }

        fn with_delay(self, delay: Duration) -> Self {
            self.state.try_lock().expect("unshared during setup").delay = delay;
            self
        }

        async fn call_times(&self) -> Vec<Instant> {
            self.state.lock().await.calls.iter().map(|(at, _)| *at).collect()
        }

        async fn requests(&self) -> Vec<SearchRequest> {
            self.state.lock().await.calls.iter().map(|(_, request)| request.clone()).collect()
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedProvider {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, ProviderError> {
            let (response, delay) = {
                let mut state = self.state.lock().await;
                state.calls.push((Instant::now(), request.clone()));
                let response = state.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()));
                (response, state.delay)
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response
        }
    }

    fn query(text: &str) -> Query {
        Query::from_raw(
            &Question {
                text: text.to_owned(),
                channel_id: "C1".to_owned(),
                thread_ts: None,
                user_id: "U1".to_owned(),
            },
            1000,
        )
        .expect("valid query")
    }

    fn results(count: u32) -> Vec<SearchResult> {
        (1..=count)
            .map(|rank| {
                SearchResult::new(
                    format!("Result {rank}"),
                    "snippet",
                    format!("https://doc.example.com/{rank}"),
                    rank,
                )
                .expect("valid url")
            })
            .collect()
    }

    fn client(provider: Arc<ScriptedProvider>) -> SearchClient {
        SearchClient::new(
            provider,
            SearchSettings { context_term: "Dataiku".to_owned(), ..SearchSettings::default() },
            RetryPolicy { jitter: false, ..RetryPolicy::default() },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_then_success_returns_after_three_calls_with_growing_delay() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![
            Err(ProviderError::rate_limited(None)),
            Err(ProviderError::rate_limited(None)),
            Ok(results(3)),
        ]));
        let client = client(Arc::clone(&provider));

        let found = client.search(&query("visual recipes"), 5).await.expect("search succeeds");

        assert_eq!(found.len(), 3);
        let times = provider.call_times().await;
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert_eq!(first_gap, Duration::from_millis(500));
        assert_eq!(second_gap, Duration::from_millis(1_000));
        assert!(second_gap > first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_server_errors_exhaust_retries() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![
            Err(ProviderError::status(500, "boom")),
            Err(ProviderError::status(500, "boom")),
            Err(ProviderError::status(500, "boom")),
            Err(ProviderError::status(500, "boom")),
        ]));
        let client = client(Arc::clone(&provider));

        let error = client.search(&query("visual recipes"), 5).await.expect_err("search fails");

        assert_eq!(
            error,
            PipelineError::SearchUnavailable {
                attempts: 3,
                last_status: Some(500),
                detail: "upstream returned HTTP 500: boom".to_owned(),
            }
        );
        assert_eq!(provider.call_times().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_is_honoured_and_capped() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![
            Err(ProviderError::rate_limited(Some(Duration::from_secs(3)))),
            Err(ProviderError::rate_limited(Some(Duration::from_secs(90)))),
            Ok(results(1)),
        ]));
        let client = client(Arc::clone(&provider));

        client.search(&query("joins"), 5).await.expect("search succeeds");

        let times = provider.call_times().await;
        assert_eq!(times[1] - times[0], Duration::from_secs(3));
        assert_eq!(times[2] - times[1], Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_fail_without_retry() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![Err(ProviderError::status(401, "bad token"))]));
        let client = client(Arc::clone(&provider));

        let error = client.search(&query("joins"), 5).await.expect_err("search fails");

        assert!(matches!(error, PipelineError::SearchUnavailable { attempts: 1, last_status: Some(401), .. }));
        assert_eq!(provider.call_times().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out_each_attempt() {
        let provider = Arc::new(
            ScriptedProvider::with_script(vec![Ok(results(1)), Ok(results(1)), Ok(results(1))])
                .with_delay(Duration::from_secs(30)),
        );
        let client = client(Arc::clone(&provider));
        let started = Instant::now();

        let error = client.search(&query("joins"), 5).await.expect_err("search times out");

        assert!(matches!(error, PipelineError::SearchUnavailable { attempts: 3, last_status: None, .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(8 * 3) + Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn empty_results_are_reported_as_no_results() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![Ok(Vec::new())]));
        let error = client(provider).search(&query("joins"), 5).await.expect_err("no results");
        assert_eq!(error, PipelineError::NoSearchResults);
    }

    #[tokio::test]
    async fn request_appends_context_term_and_caps_count() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![Ok(results(12))]));
        let client = client(Arc::clone(&provider));

        let found = client.search(&query("How do I create a visual recipe?"), 50).await.expect("found");

        assert_eq!(found.len(), 10);
        let requests = provider.requests().await;
        assert_eq!(requests[0].query, "How do I create a visual recipe Dataiku");
        assert_eq!(requests[0].count, 10);
        assert_eq!(requests[0].source_filter, "web");
    }

    #[test]
    fn context_term_is_not_repeated() {
        let provider = Arc::new(ScriptedProvider::with_script(Vec::new()));
        let request = client(provider).build_request(&query("dataiku flow zones"), 5).expect("request");
        assert_eq!(request.query, "dataiku flow zones");
    }

    #[test]
    fn punctuation_only_question_has_no_search_terms() {
        let provider = Arc::new(ScriptedProvider::with_script(Vec::new()));
        let error = client(provider).build_request(&query("??? ***"), 5).expect_err("no terms");
        assert!(matches!(error, PipelineError::InvalidQuery(_)));
    }

    #[test]
    fn brave_results_skip_malformed_urls_and_keep_upstream_rank() {
        let body: BraveResponse = serde_json::from_value(json!({
            "type": "search",
            "web": {
                "results": [
                    {"title": "Good", "description": "first", "url": "https://doc.example.com/a"},
                    {"title": "Broken", "description": "second", "url": "not a url"},
                    {"title": "Also good", "description": "third", "url": "https://community.example.com/b"}
                ]
            }
        }))
        .expect("decodes");

        let results = collect_results(body);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 3);
        assert_eq!(results[1].snippet, "third");
    }

    #[test]
    fn brave_response_without_web_section_is_empty() {
        let body: BraveResponse = serde_json::from_value(json!({"type": "search"})).expect("decodes");
        assert!(collect_results(body).is_empty());
    }
}
