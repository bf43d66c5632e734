use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::answer::ReasoningEffort;
use crate::domain::search::MAX_SEARCH_RESULTS;
use crate::fallback::{FallbackTable, FallbackTopic};
use crate::format::FormatOptions;
use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub fallback: FallbackConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub signing_secret: SecretString,
    pub verify_signatures: bool,
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub suggested_prompts: bool,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub result_count: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Appended to every query to keep results on-topic.
    pub context_term: String,
    pub source_filter: String,
    pub freshness: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub reasoning_effort: ReasoningEffort,
    pub max_completion_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retry_after_secs: u64,
    pub jitter: bool,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_query_chars: usize,
    pub max_footnotes: usize,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub dedup_ttl_secs: u64,
    pub status_text: String,
    /// Questions a single user may ask per minute before burst tokens are spent.
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, Default)]
pub struct FallbackConfig {
    /// Replaces the built-in table when non-empty.
    pub topics: Vec<FallbackTopic>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub verify_signatures: Option<bool>,
    pub search_api_key: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                bot_token: String::new().into(),
                signing_secret: String::new().into(),
                verify_signatures: true,
                api_base_url: "https://slack.com/api".to_string(),
                timeout_secs: 10,
                suggested_prompts: true,
            },
            search: SearchConfig {
                api_key: String::new().into(),
                base_url: "https://api.search.brave.com/res/v1/web/search".to_string(),
                result_count: 5,
                timeout_secs: 8,
                max_retries: 2,
                context_term: "Dataiku".to_string(),
                source_filter: "web".to_string(),
                freshness: None,
            },
            llm: LlmConfig {
                api_key: String::new().into(),
                base_url: "https://api.openai.com/v1".to_string(),
                model: "o4-mini".to_string(),
                reasoning_effort: ReasoningEffort::Medium,
                max_completion_tokens: 1500,
                timeout_secs: 30,
            },
            retry: RetryConfig {
                base_delay_ms: 500,
                max_delay_ms: 4_000,
                max_retry_after_secs: 10,
                jitter: true,
            },
            pipeline: PipelineConfig {
                max_query_chars: 1000,
                max_footnotes: 3,
                worker_count: 4,
                queue_capacity: 32,
                dedup_ttl_secs: 600,
                status_text: "is searching...".to_string(),
                rate_limit_per_minute: 20,
                rate_limit_burst: 5,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            fallback: FallbackConfig::default(),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("relay.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Retry schedule for the search client.
    pub fn search_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.search.max_retries,
            base_delay_ms: self.retry.base_delay_ms,
            max_delay_ms: self.retry.max_delay_ms,
            max_retry_after_ms: self.retry.max_retry_after_secs.saturating_mul(1_000),
            jitter: self.retry.jitter,
        }
    }

    /// Synthesis gets a single rate-limit retry.
    pub fn synthesis_retry_policy(&self) -> RetryPolicy {
        self.search_retry_policy().with_max_retries(1)
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions { max_footnotes: self.pipeline.max_footnotes }
    }

    pub fn fallback_table(&self) -> FallbackTable {
        if self.fallback.topics.is_empty() {
            FallbackTable::default()
        } else {
            FallbackTable::new(self.fallback.topics.clone())
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = secret_value(signing_secret);
            }
            if let Some(verify_signatures) = slack.verify_signatures {
                self.slack.verify_signatures = verify_signatures;
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(timeout_secs) = slack.timeout_secs {
                self.slack.timeout_secs = timeout_secs;
            }
            if let Some(suggested_prompts) = slack.suggested_prompts {
                self.slack.suggested_prompts = suggested_prompts;
            }
        }

        if let Some(search) = patch.search {
            if let Some(api_key) = search.api_key {
                self.search.api_key = secret_value(api_key);
            }
            if let Some(base_url) = search.base_url {
                self.search.base_url = base_url;
            }
            if let Some(result_count) = search.result_count {
                self.search.result_count = result_count;
            }
            if let Some(timeout_secs) = search.timeout_secs {
                self.search.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = search.max_retries {
                self.search.max_retries = max_retries;
            }
            if let Some(context_term) = search.context_term {
                self.search.context_term = context_term;
            }
            if let Some(source_filter) = search.source_filter {
                self.search.source_filter = source_filter;
            }
            if let Some(freshness) = search.freshness {
                self.search.freshness = Some(freshness).filter(|value| !value.trim().is_empty());
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = secret_value(api_key);
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(reasoning_effort) = llm.reasoning_effort {
                self.llm.reasoning_effort = reasoning_effort;
            }
            if let Some(max_completion_tokens) = llm.max_completion_tokens {
                self.llm.max_completion_tokens = max_completion_tokens;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(retry) = patch.retry {
            if let Some(base_delay_ms) = retry.base_delay_ms {
                self.retry.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = retry.max_delay_ms {
                self.retry.max_delay_ms = max_delay_ms;
            }
            if let Some(max_retry_after_secs) = retry.max_retry_after_secs {
                self.retry.max_retry_after_secs = max_retry_after_secs;
            }
            if let Some(jitter) = retry.jitter {
                self.retry.jitter = jitter;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(max_query_chars) = pipeline.max_query_chars {
                self.pipeline.max_query_chars = max_query_chars;
            }
            if let Some(max_footnotes) = pipeline.max_footnotes {
                self.pipeline.max_footnotes = max_footnotes;
            }
            if let Some(worker_count) = pipeline.worker_count {
                self.pipeline.worker_count = worker_count;
            }
            if let Some(queue_capacity) = pipeline.queue_capacity {
                self.pipeline.queue_capacity = queue_capacity;
            }
            if let Some(dedup_ttl_secs) = pipeline.dedup_ttl_secs {
                self.pipeline.dedup_ttl_secs = dedup_ttl_secs;
            }
            if let Some(status_text) = pipeline.status_text {
                self.pipeline.status_text = status_text;
            }
            if let Some(rate_limit_per_minute) = pipeline.rate_limit_per_minute {
                self.pipeline.rate_limit_per_minute = rate_limit_per_minute;
            }
            if let Some(rate_limit_burst) = pipeline.rate_limit_burst {
                self.pipeline.rate_limit_burst = rate_limit_burst;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(fallback) = patch.fallback {
            if let Some(topics) = fallback.topics {
                self.fallback.topics = topics;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RELAY_SLACK_BOT_TOKEN").or_else(|| read_env("SLACK_BOT_TOKEN")) {
            self.slack.bot_token = secret_value(value);
        }
        let signing_secret =
            read_env("RELAY_SLACK_SIGNING_SECRET").or_else(|| read_env("SLACK_SIGNING_SECRET"));
        if let Some(value) = signing_secret {
            self.slack.signing_secret = secret_value(value);
        }
        if let Some(value) = read_env("RELAY_SLACK_VERIFY_SIGNATURES") {
            self.slack.verify_signatures = parse_bool("RELAY_SLACK_VERIFY_SIGNATURES", &value)?;
        }
        if let Some(value) = read_env("RELAY_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("RELAY_SLACK_TIMEOUT_SECS") {
            self.slack.timeout_secs = parse_u64("RELAY_SLACK_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RELAY_SLACK_SUGGESTED_PROMPTS") {
            self.slack.suggested_prompts = parse_bool("RELAY_SLACK_SUGGESTED_PROMPTS", &value)?;
        }

        if let Some(value) = read_env("RELAY_SEARCH_API_KEY").or_else(|| read_env("BRAVE_API_KEY")) {
            self.search.api_key = secret_value(value);
        }
        if let Some(value) = read_env("RELAY_SEARCH_BASE_URL") {
            self.search.base_url = value;
        }
        if let Some(value) = read_env("RELAY_SEARCH_RESULT_COUNT") {
            self.search.result_count = parse_usize("RELAY_SEARCH_RESULT_COUNT", &value)?;
        }
        if let Some(value) = read_env("RELAY_SEARCH_TIMEOUT_SECS") {
            self.search.timeout_secs = parse_u64("RELAY_SEARCH_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RELAY_SEARCH_MAX_RETRIES") {
            self.search.max_retries = parse_u32("RELAY_SEARCH_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("RELAY_SEARCH_CONTEXT_TERM") {
            self.search.context_term = value;
        }
        if let Some(value) = read_env("RELAY_SEARCH_SOURCE_FILTER") {
            self.search.source_filter = value;
        }
        if let Some(value) = read_env("RELAY_SEARCH_FRESHNESS") {
            self.search.freshness = Some(value);
        }

        if let Some(value) = read_env("RELAY_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY")) {
            self.llm.api_key = secret_value(value);
        }
        if let Some(value) = read_env("RELAY_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("RELAY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("RELAY_LLM_REASONING_EFFORT") {
            self.llm.reasoning_effort = value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "RELAY_LLM_REASONING_EFFORT".to_string(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = read_env("RELAY_LLM_MAX_COMPLETION_TOKENS") {
            self.llm.max_completion_tokens = parse_u32("RELAY_LLM_MAX_COMPLETION_TOKENS", &value)?;
        }
        if let Some(value) = read_env("RELAY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("RELAY_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RELAY_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_u64("RELAY_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("RELAY_RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse_u64("RELAY_RETRY_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("RELAY_RETRY_MAX_RETRY_AFTER_SECS") {
            self.retry.max_retry_after_secs = parse_u64("RELAY_RETRY_MAX_RETRY_AFTER_SECS", &value)?;
        }
        if let Some(value) = read_env("RELAY_RETRY_JITTER") {
            self.retry.jitter = parse_bool("RELAY_RETRY_JITTER", &value)?;
        }

        if let Some(value) = read_env("RELAY_PIPELINE_WORKER_COUNT") {
            self.pipeline.worker_count = parse_usize("RELAY_PIPELINE_WORKER_COUNT", &value)?;
        }
        if let Some(value) = read_env("RELAY_PIPELINE_QUEUE_CAPACITY") {
            self.pipeline.queue_capacity = parse_usize("RELAY_PIPELINE_QUEUE_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("RELAY_PIPELINE_DEDUP_TTL_SECS") {
            self.pipeline.dedup_ttl_secs = parse_u64("RELAY_PIPELINE_DEDUP_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("RELAY_PIPELINE_MAX_QUERY_CHARS") {
            self.pipeline.max_query_chars = parse_usize("RELAY_PIPELINE_MAX_QUERY_CHARS", &value)?;
        }
        if let Some(value) = read_env("RELAY_PIPELINE_MAX_FOOTNOTES") {
            self.pipeline.max_footnotes = parse_usize("RELAY_PIPELINE_MAX_FOOTNOTES", &value)?;
        }
        if let Some(value) = read_env("RELAY_PIPELINE_STATUS_TEXT") {
            self.pipeline.status_text = value;
        }
        if let Some(value) = read_env("RELAY_PIPELINE_RATE_LIMIT_PER_MINUTE") {
            self.pipeline.rate_limit_per_minute =
                parse_u32("RELAY_PIPELINE_RATE_LIMIT_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("RELAY_PIPELINE_RATE_LIMIT_BURST") {
            self.pipeline.rate_limit_burst = parse_u32("RELAY_PIPELINE_RATE_LIMIT_BURST", &value)?;
        }

        if let Some(value) = read_env("RELAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RELAY_SERVER_PORT").or_else(|| read_env("PORT")) {
            self.server.port = parse_u16("RELAY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("RELAY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("RELAY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("RELAY_LOGGING_LEVEL").or_else(|| read_env("RELAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("RELAY_LOGGING_FORMAT").or_else(|| read_env("RELAY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(bot_token);
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = secret_value(signing_secret);
        }
        if let Some(verify_signatures) = overrides.verify_signatures {
            self.slack.verify_signatures = verify_signatures;
        }
        if let Some(api_key) = overrides.search_api_key {
            self.search.api_key = secret_value(api_key);
        }
        if let Some(api_key) = overrides.llm_api_key {
            self.llm.api_key = secret_value(api_key);
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(reasoning_effort) = overrides.reasoning_effort {
            self.llm.reasoning_effort = reasoning_effort;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_search(&self.search)?;
        validate_llm(&self.llm)?;
        validate_retry(&self.retry)?;
        validate_pipeline(&self.pipeline)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_fallback(&self.fallback)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("relay.toml"), PathBuf::from("config/relay.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{field} must start with http:// or https://")))
    }
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used an app-level token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if slack.verify_signatures && slack.signing_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.signing_secret is required when slack.verify_signatures is true. Get it from https://api.slack.com/apps > Your App > Basic Information > Signing Secret".to_string()
        ));
    }

    validate_http_url("slack.api_base_url", &slack.api_base_url)?;
    if slack.timeout_secs == 0 || slack.timeout_secs > 60 {
        return Err(ConfigError::Validation("slack.timeout_secs must be in range 1..=60".to_string()));
    }

    Ok(())
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    if search.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation("search.api_key is required".to_string()));
    }
    validate_http_url("search.base_url", &search.base_url)?;

    if search.result_count == 0 || search.result_count > MAX_SEARCH_RESULTS {
        return Err(ConfigError::Validation(format!(
            "search.result_count must be in range 1..={MAX_SEARCH_RESULTS}"
        )));
    }
    if search.timeout_secs == 0 || search.timeout_secs > 60 {
        return Err(ConfigError::Validation("search.timeout_secs must be in range 1..=60".to_string()));
    }
    if search.max_retries > 5 {
        return Err(ConfigError::Validation("search.max_retries must be at most 5".to_string()));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation("llm.api_key is required".to_string()));
    }
    validate_http_url("llm.base_url", &llm.base_url)?;

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }
    if !(100..=4000).contains(&llm.max_completion_tokens) {
        return Err(ConfigError::Validation(
            "llm.max_completion_tokens must be in range 100..=4000".to_string(),
        ));
    }
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation("llm.timeout_secs must be in range 1..=300".to_string()));
    }

    Ok(())
}

fn validate_retry(retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(ConfigError::Validation(
            "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
        ));
    }
    if retry.max_retry_after_secs > 60 {
        return Err(ConfigError::Validation("retry.max_retry_after_secs must be at most 60".to_string()));
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.max_query_chars == 0 || pipeline.max_query_chars > 5000 {
        return Err(ConfigError::Validation(
            "pipeline.max_query_chars must be in range 1..=5000".to_string(),
        ));
    }
    if pipeline.max_footnotes > MAX_SEARCH_RESULTS {
        return Err(ConfigError::Validation(format!(
            "pipeline.max_footnotes must be at most {MAX_SEARCH_RESULTS}"
        )));
    }
    if pipeline.worker_count == 0 || pipeline.worker_count > 64 {
        return Err(ConfigError::Validation("pipeline.worker_count must be in range 1..=64".to_string()));
    }
    if pipeline.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "pipeline.queue_capacity must be greater than zero".to_string(),
        ));
    }
    if pipeline.dedup_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "pipeline.dedup_ttl_secs must be greater than zero".to_string(),
        ));
    }
    if pipeline.rate_limit_per_minute == 0 || pipeline.rate_limit_per_minute > 100 {
        return Err(ConfigError::Validation(
            "pipeline.rate_limit_per_minute must be in range 1..=100".to_string(),
        ));
    }
    if pipeline.rate_limit_burst > 20 {
        return Err(ConfigError::Validation("pipeline.rate_limit_burst must be at most 20".to_string()));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_fallback(fallback: &FallbackConfig) -> Result<(), ConfigError> {
    for (position, topic) in fallback.topics.iter().enumerate() {
        let has_keyword = topic.keywords.iter().any(|keyword| !keyword.trim().is_empty());
        if topic.title.trim().is_empty() || topic.body.trim().is_empty() || !has_keyword {
            return Err(ConfigError::Validation(format!(
                "fallback.topics[{position}] needs a title, a body and at least one keyword"
            )));
        }
        if topic.body.contains("http://") || topic.body.contains("https://") {
            return Err(ConfigError::Validation(format!(
                "fallback.topics[{position}].body must not contain raw URLs"
            )));
        }
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    search: Option<SearchPatch>,
    llm: Option<LlmPatch>,
    retry: Option<RetryPatch>,
    pipeline: Option<PipelinePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    fallback: Option<FallbackPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    signing_secret: Option<String>,
    verify_signatures: Option<bool>,
    api_base_url: Option<String>,
    timeout_secs: Option<u64>,
    suggested_prompts: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    result_count: Option<usize>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    context_term: Option<String>,
    source_filter: Option<String>,
    freshness: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    reasoning_effort: Option<ReasoningEffort>,
    max_completion_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryPatch {
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_retry_after_secs: Option<u64>,
    jitter: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    max_query_chars: Option<usize>,
    max_footnotes: Option<usize>,
    worker_count: Option<usize>,
    queue_capacity: Option<usize>,
    dedup_ttl_secs: Option<u64>,
    status_text: Option<String>,
    rate_limit_per_minute: Option<u32>,
    rate_limit_burst: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct FallbackPatch {
    topics: Option<Vec<FallbackTopic>>,
}
