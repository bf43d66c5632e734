use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use relay_core::config::AppConfig;
use relay_core::rate_limit::RATE_LIMITED_TEXT;
use relay_core::{FormattedMessage, PipelineOutcome, Question, RateDecision, RateLimiter, SlidingWindowLimiter};
use tracing::{info, warn};

use crate::api::SlackApi;
use crate::events::{
    EventContext, EventHandler, EventHandlerError, EventRouter, HandlerResult, SlackEnvelope, SlackEvent,
    SlackEventType,
};
use crate::message::{thread_title, PostMessage, SuggestedPrompts};
use crate::status::StatusNotifier;

/// Turns a question into exactly one postable outcome.
#[async_trait]
pub trait QuestionAnswerer: Send + Sync {
    async fn answer(&self, question: &Question) -> PipelineOutcome;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerSettings {
    pub status_text: String,
    pub suggested_prompts: bool,
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            status_text: "is searching...".to_owned(),
            suggested_prompts: true,
            rate_limit_per_minute: 20,
            rate_limit_burst: 5,
        }
    }
}

impl HandlerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            status_text: config.pipeline.status_text.clone(),
            suggested_prompts: config.slack.suggested_prompts,
            rate_limit_per_minute: config.pipeline.rate_limit_per_minute,
            rate_limit_burst: config.pipeline.rate_limit_burst,
        }
    }
}

/// Registers the question, thread-started and context-changed handlers.
/// Mentions and direct messages share one per-user rate limiter.
pub fn build_router(
    api: Arc<dyn SlackApi>,
    answerer: Arc<dyn QuestionAnswerer>,
    settings: &HandlerSettings,
) -> EventRouter {
    let limiter: Arc<dyn RateLimiter> =
        Arc::new(SlidingWindowLimiter::new(settings.rate_limit_per_minute, settings.rate_limit_burst));
    let mut router = EventRouter::new();
    router.register(QuestionHandler::new(
        SlackEventType::AppMention,
        Arc::clone(&answerer),
        Arc::clone(&api),
        Arc::clone(&limiter),
        &settings.status_text,
    ));
    router.register(QuestionHandler::new(
        SlackEventType::DirectMessage,
        answerer,
        Arc::clone(&api),
        limiter,
        &settings.status_text,
    ));
    router.register(ThreadStartedHandler::new(Arc::clone(&api), settings.suggested_prompts));
    router.register(ContextChangedHandler);
    router
}

pub struct QuestionHandler {
    event_type: SlackEventType,
    answerer: Arc<dyn QuestionAnswerer>,
    api: Arc<dyn SlackApi>,
    limiter: Arc<dyn RateLimiter>,
    status: StatusNotifier,
    status_text: String,
}

impl QuestionHandler {
    pub fn new(
        event_type: SlackEventType,
        answerer: Arc<dyn QuestionAnswerer>,
        api: Arc<dyn SlackApi>,
        limiter: Arc<dyn RateLimiter>,
        status_text: &str,
    ) -> Self {
        Self {
            event_type,
            answerer,
            status: StatusNotifier::new(Arc::clone(&api)),
            api,
            limiter,
            status_text: status_text.to_owned(),
        }
    }
}

#[async_trait]
impl EventHandler for QuestionHandler {
    fn event_type(&self) -> SlackEventType {
        self.event_type
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let (event, direct) = match &envelope.event {
            SlackEvent::AppMention(event) => (event, false),
            SlackEvent::DirectMessage(event) => (event, true),
            _ => return Ok(HandlerResult::Ignored),
        };
        let thread_ts = event.reply_thread_ts();
        let question = Question {
            text: strip_mentions(&event.text),
            channel_id: event.channel_id.clone(),
            thread_ts: Some(thread_ts.to_owned()),
            user_id: event.user_id.clone(),
        };

        info!(
            event_name = "handler.question.received",
            correlation_id = %ctx.correlation_id,
            event_id = %ctx.event_id,
            channel_id = %event.channel_id,
            thread_id = thread_ts,
            direct,
            "answering question"
        );

        if let RateDecision::Limited { retry_after } = self.limiter.acquire(&event.user_id) {
            warn!(
                event_name = "handler.question.rate_limited",
                correlation_id = %ctx.correlation_id,
                event_id = %ctx.event_id,
                thread_id = thread_ts,
                retry_after_secs = retry_after.as_secs(),
                "user is over the question rate limit"
            );
            let notice = FormattedMessage::degraded(RATE_LIMITED_TEXT);
            self.api
                .post_message(&PostMessage::reply(&event.channel_id, thread_ts, &notice))
                .await
                .map_err(EventHandlerError::PostFailed)?;
            return Ok(HandlerResult::Posted);
        }

        let status = self.status.begin(&event.channel_id, thread_ts, &self.status_text).await;
        let outcome = self.answerer.answer(&question).await;
        status.clear().await;

        let outcome_label = outcome.label();
        let message = outcome.into_message();
        let posted = self
            .api
            .post_message(&PostMessage::reply(&event.channel_id, thread_ts, &message))
            .await
            .map_err(EventHandlerError::PostFailed)?;

        info!(
            event_name = "handler.question.posted",
            correlation_id = %ctx.correlation_id,
            event_id = %ctx.event_id,
            thread_id = thread_ts,
            message_ts = %posted.ts,
            outcome = outcome_label,
            degraded = message.degraded,
            footnote_count = message.footnotes.len(),
            "reply posted"
        );

        if direct && event.starts_thread() && !question.text.is_empty() {
            let title = thread_title(&question.text);
            if let Err(error) = self.api.set_title(&event.channel_id, thread_ts, &title).await {
                warn!(
                    event_name = "handler.question.title_failed",
                    correlation_id = %ctx.correlation_id,
                    thread_id = thread_ts,
                    error = %error,
                    "could not set thread title"
                );
            }
        }

        Ok(HandlerResult::Posted)
    }
}

pub struct ThreadStartedHandler {
    api: Arc<dyn SlackApi>,
    suggested_prompts: bool,
}

impl ThreadStartedHandler {
    pub fn new(api: Arc<dyn SlackApi>, suggested_prompts: bool) -> Self {
        Self { api, suggested_prompts }
    }
}

#[async_trait]
impl EventHandler for ThreadStartedHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AssistantThreadStarted
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AssistantThreadStarted(thread) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        self.api
            .post_message(&PostMessage::welcome(&thread.channel_id, &thread.thread_ts))
            .await
            .map_err(EventHandlerError::PostFailed)?;

        if self.suggested_prompts {
            let prompts = SuggestedPrompts::starter_set(&thread.channel_id, &thread.thread_ts);
            if let Err(error) = self.api.set_suggested_prompts(&prompts).await {
                warn!(
                    event_name = "handler.thread_started.prompts_failed",
                    correlation_id = %ctx.correlation_id,
                    thread_id = %thread.thread_ts,
                    error = %error,
                    "could not set suggested prompts"
                );
            }
        }

        info!(
            event_name = "handler.thread_started.welcomed",
            correlation_id = %ctx.correlation_id,
            channel_id = %thread.channel_id,
            thread_id = %thread.thread_ts,
            "assistant thread welcomed"
        );
        Ok(HandlerResult::Posted)
    }
}

/// Context changes need no reply; they are only recorded.
pub struct ContextChangedHandler;

#[async_trait]
impl EventHandler for ContextChangedHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AssistantThreadContextChanged
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AssistantThreadContextChanged(thread) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        info!(
            event_name = "handler.thread_context.changed",
            correlation_id = %ctx.correlation_id,
            thread_id = %thread.thread_ts,
            context_channel_id = thread.context_channel_id.as_deref().unwrap_or("unknown"),
            "assistant thread context changed"
        );
        Ok(HandlerResult::Processed)
    }
}

fn mention_regex() -> &'static Regex {
    static MENTION: OnceLock<Regex> = OnceLock::new();
    MENTION.get_or_init(|| Regex::new(r"<@[A-Z0-9]+(?:\|[^>]*)?>").expect("valid mention regex"))
}

pub fn strip_mentions(text: &str) -> String {
    mention_regex().replace_all(text, " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_core::rate_limit::RATE_LIMITED_TEXT;
    use relay_core::{FormattedMessage, PipelineOutcome, Question};
    use tokio::sync::Mutex;

    use super::{build_router, strip_mentions, HandlerSettings, QuestionAnswerer};
    use crate::api::SlackApiError;
    use crate::events::{
        AssistantThreadEvent, EventContext, EventHandlerError, HandlerResult, MessageEvent, SlackEnvelope,
        SlackEvent,
    };
    use crate::message::WELCOME_TEXT;
    use crate::testing::RecordingSlackApi;

    struct CannedAnswerer {
        outcome: PipelineOutcome,
        questions: Mutex<Vec<Question>>,
    }

    impl CannedAnswerer {
        fn new(outcome: PipelineOutcome) -> Self {
            Self { outcome, questions: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl QuestionAnswerer for CannedAnswerer {
        async fn answer(&self, question: &Question) -> PipelineOutcome {
            self.questions.lock().await.push(question.clone());
            self.outcome.clone()
        }
    }

    fn message(text: &str, thread_ts: Option<&str>) -> MessageEvent {
        MessageEvent {
            channel_id: "D1".to_owned(),
            user_id: "U1".to_owned(),
            text: text.to_owned(),
            ts: "1700000000.000100".to_owned(),
            thread_ts: thread_ts.map(str::to_owned),
        }
    }

    fn envelope(event: SlackEvent) -> SlackEnvelope {
        SlackEnvelope { event_id: "Ev1".to_owned(), event }
    }

    #[test]
    fn mentions_are_removed_from_question_text() {
        assert_eq!(strip_mentions("<@U012AB3CD> how do I   join?"), "how do I join?");
        assert_eq!(strip_mentions("hey <@W1|relay>, help"), "hey , help");
        assert_eq!(strip_mentions("<@U1>"), "");
    }

    #[tokio::test]
    async fn mention_is_answered_in_thread_with_status_around_the_pipeline() {
        let api = Arc::new(RecordingSlackApi::default());
        let answerer =
            Arc::new(CannedAnswerer::new(PipelineOutcome::Success(FormattedMessage::plain("Use a Join recipe [1]."))));
        let router = build_router(api.clone(), answerer.clone(), &HandlerSettings::default());

        let result = router
            .route(&envelope(SlackEvent::AppMention(message("<@UBOT> how do I join?", None))), &EventContext::default())
            .await;

        assert_eq!(result, Ok(HandlerResult::Posted));
        assert_eq!(answerer.questions.lock().await[0].text, "how do I join?");
        assert_eq!(
            api.calls().await,
            vec![
                "assistant.threads.setStatus:is searching...".to_owned(),
                "assistant.threads.setStatus:".to_owned(),
                "chat.postMessage".to_owned(),
            ]
        );
        let posts = api.posts().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].thread_ts.as_deref(), Some("1700000000.000100"));
        assert!(!posts[0].unfurl_links);
        assert!(api.titles().await.is_empty());
    }

    #[tokio::test]
    async fn total_failure_still_posts_exactly_one_message() {
        let api = Arc::new(RecordingSlackApi::default());
        let answerer = Arc::new(CannedAnswerer::new(PipelineOutcome::TotalFailure("Sorry.".to_owned())));
        let router = build_router(api.clone(), answerer, &HandlerSettings::default());

        router
            .route(&envelope(SlackEvent::DirectMessage(message("what?", Some("1.0")))), &EventContext::default())
            .await
            .expect("handled");

        let posts = api.posts().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "Sorry.");
        assert_eq!(posts[0].thread_ts.as_deref(), Some("1.0"));
    }

    #[tokio::test]
    async fn new_direct_message_thread_gets_a_title() {
        let api = Arc::new(RecordingSlackApi::default());
        let answerer = Arc::new(CannedAnswerer::new(PipelineOutcome::Success(FormattedMessage::plain("ok"))));
        let router = build_router(api.clone(), answerer, &HandlerSettings::default());

        router
            .route(
                &envelope(SlackEvent::DirectMessage(message("How do I schedule a scenario?", None))),
                &EventContext::default(),
            )
            .await
            .expect("handled");

        assert_eq!(
            api.titles().await,
            vec![("1700000000.000100".to_owned(), "Q: How do I schedule a scenario?".to_owned())]
        );
    }

    #[tokio::test]
    async fn post_failure_is_reported_once_and_not_retried() {
        let api = Arc::new(RecordingSlackApi::default());
        api.fail_next_post(SlackApiError::RateLimited { retry_after: None }).await;
        let answerer = Arc::new(CannedAnswerer::new(PipelineOutcome::Success(FormattedMessage::plain("ok"))));
        let router = build_router(api.clone(), answerer, &HandlerSettings::default());

        let result = router
            .route(&envelope(SlackEvent::DirectMessage(message("hello", None))), &EventContext::default())
            .await;

        assert_eq!(
            result,
            Err(EventHandlerError::PostFailed(SlackApiError::RateLimited { retry_after: None }))
        );
        assert_eq!(api.posts().await.len(), 1);
        assert!(api.titles().await.is_empty());
        assert_eq!(api.statuses().await.last().map(String::as_str), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_user_gets_a_rate_limit_reply_until_the_window_passes() {
        let api = Arc::new(RecordingSlackApi::default());
        let answerer = Arc::new(CannedAnswerer::new(PipelineOutcome::Success(FormattedMessage::plain("ok"))));
        let settings =
            HandlerSettings { rate_limit_per_minute: 1, rate_limit_burst: 0, ..HandlerSettings::default() };
        let router = build_router(api.clone(), answerer.clone(), &settings);
        let ask = || envelope(SlackEvent::DirectMessage(message("what is a recipe?", Some("1.0"))));

        router.route(&ask(), &EventContext::default()).await.expect("handled");
        let limited = router
            .route(&envelope(SlackEvent::AppMention(message("<@UBOT> again?", Some("1.0")))), &EventContext::default())
            .await;

        assert_eq!(limited, Ok(HandlerResult::Posted));
        assert_eq!(answerer.questions.lock().await.len(), 1, "the limited question never reaches the pipeline");
        let posts = api.posts().await;
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].text, RATE_LIMITED_TEXT);
        assert_eq!(posts[1].thread_ts.as_deref(), Some("1.0"));
        assert_eq!(api.statuses().await.len(), 2, "no status is set for a limited question");

        tokio::time::advance(Duration::from_secs(60)).await;
        router.route(&ask(), &EventContext::default()).await.expect("handled");
        assert_eq!(answerer.questions.lock().await.len(), 2);
        assert_eq!(api.posts().await[2].text, "ok");
    }

    #[tokio::test]
    async fn thread_start_posts_welcome_and_prompts() {
        let api = Arc::new(RecordingSlackApi::default());
        let answerer = Arc::new(CannedAnswerer::new(PipelineOutcome::TotalFailure(String::new())));
        let router = build_router(api.clone(), answerer.clone(), &HandlerSettings::default());
        let thread = AssistantThreadEvent {
            channel_id: "D1".to_owned(),
            thread_ts: "2.0".to_owned(),
            context_channel_id: None,
        };

        let result =
            router.route(&envelope(SlackEvent::AssistantThreadStarted(thread)), &EventContext::default()).await;

        assert_eq!(result, Ok(HandlerResult::Posted));
        assert_eq!(api.posts().await[0].text, WELCOME_TEXT);
        assert_eq!(api.prompts().await.len(), 1);
        assert!(answerer.questions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn prompts_can_be_disabled() {
        let api = Arc::new(RecordingSlackApi::default());
        let answerer = Arc::new(CannedAnswerer::new(PipelineOutcome::TotalFailure(String::new())));
        let settings = HandlerSettings { suggested_prompts: false, ..HandlerSettings::default() };
        let router = build_router(api.clone(), answerer, &settings);
        let thread = AssistantThreadEvent {
            channel_id: "D1".to_owned(),
            thread_ts: "2.0".to_owned(),
            context_channel_id: None,
        };

        router
            .route(&envelope(SlackEvent::AssistantThreadStarted(thread)), &EventContext::default())
            .await
            .expect("handled");

        assert!(api.prompts().await.is_empty());
    }

    #[tokio::test]
    async fn context_change_is_processed_without_posting() {
        let api = Arc::new(RecordingSlackApi::default());
        let answerer = Arc::new(CannedAnswerer::new(PipelineOutcome::TotalFailure(String::new())));
        let router = build_router(api.clone(), answerer, &HandlerSettings::default());
        let thread = AssistantThreadEvent {
            channel_id: "D1".to_owned(),
            thread_ts: "2.0".to_owned(),
            context_channel_id: Some("C9".to_owned()),
        };

        let result = router
            .route(&envelope(SlackEvent::AssistantThreadContextChanged(thread)), &EventContext::default())
            .await;

        assert_eq!(result, Ok(HandlerResult::Processed));
        assert!(api.calls().await.is_empty());
        assert_eq!(router.handler_count(), 4);
    }
}
