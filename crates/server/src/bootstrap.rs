use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_agent::{
    AnswerPipeline, BraveSearchProvider, LlmClient, OpenAiChatClient, PipelineBudget, ProviderError,
    SearchProvider,
};
use relay_core::config::{AppConfig, ConfigError};
use relay_core::{InMemoryDedupStore, PipelineOutcome, Question};
use relay_slack::{
    build_router, EventDispatcher, HandlerSettings, QuestionAnswerer, SignatureVerifier, SlackApi,
    SlackApiError, SlackWebClient, WorkerPool, WorkerSettings,
};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub budget: PipelineBudget,
    pub dispatcher: Arc<EventDispatcher>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not build {client} client: {source}")]
    Provider {
        client: &'static str,
        #[source]
        source: ProviderError,
    },
    #[error("could not build slack client: {0}")]
    Slack(#[source] SlackApiError),
}

/// Outbound clients shared read-only by every worker.
#[derive(Clone)]
pub struct ClientBundle {
    pub slack: Arc<dyn SlackApi>,
    pub search: Arc<dyn SearchProvider>,
    pub llm: Arc<dyn LlmClient>,
}

impl ClientBundle {
    pub fn from_config(config: &AppConfig) -> Result<Self, BootstrapError> {
        let slack = SlackWebClient::from_config(&config.slack).map_err(BootstrapError::Slack)?;
        let search = BraveSearchProvider::from_config(&config.search)
            .map_err(|source| BootstrapError::Provider { client: "search", source })?;
        let llm = OpenAiChatClient::from_config(&config.llm)
            .map_err(|source| BootstrapError::Provider { client: "llm", source })?;

        Ok(Self { slack: Arc::new(slack), search: Arc::new(search), llm: Arc::new(llm) })
    }
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");
    let clients = ClientBundle::from_config(&config)?;
    Ok(assemble(config, clients))
}

/// Wires pipeline, handlers, worker pool and dispatcher around `clients`.
/// Must run inside a tokio runtime because the worker pool spawns tasks.
pub fn assemble(config: AppConfig, clients: ClientBundle) -> Application {
    let budget = PipelineBudget::from_config(&config);
    info!(
        event_name = "system.bootstrap.budget",
        correlation_id = "bootstrap",
        search_ms = duration_ms(budget.search),
        synthesis_ms = duration_ms(budget.synthesis),
        slack_ms = duration_ms(budget.slack),
        worst_case_ms = duration_ms(budget.worst_case()),
        "worst-case task latency computed"
    );

    let pipeline = AnswerPipeline::from_config(&config, clients.search, clients.llm);
    let answerer: Arc<dyn QuestionAnswerer> = Arc::new(PipelineAnswerer::new(pipeline));
    let router = Arc::new(build_router(clients.slack, answerer, &HandlerSettings::from_config(&config)));
    let pool = WorkerPool::spawn(Arc::clone(&router), WorkerSettings::from_config(&config, budget.worst_case()));

    let verifier = if config.slack.verify_signatures {
        Some(SignatureVerifier::new(config.slack.signing_secret.clone()))
    } else {
        warn!(
            event_name = "system.bootstrap.signatures_disabled",
            correlation_id = "bootstrap",
            "slack signature verification is disabled; do not expose this instance publicly"
        );
        None
    };
    let dedup = Arc::new(InMemoryDedupStore::new(Duration::from_secs(config.pipeline.dedup_ttl_secs)));
    let dispatcher = Arc::new(EventDispatcher::new(verifier, dedup, router, pool));

    info!(event_name = "system.bootstrap.ready", correlation_id = "bootstrap", "application assembled");
    Application { config, budget, dispatcher }
}

/// Adapts the answer pipeline to the Slack question handler.
pub struct PipelineAnswerer {
    pipeline: AnswerPipeline,
}

impl PipelineAnswerer {
    pub fn new(pipeline: AnswerPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl QuestionAnswerer for PipelineAnswerer {
    async fn answer(&self, question: &Question) -> PipelineOutcome {
        self.pipeline.run(question).await
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
