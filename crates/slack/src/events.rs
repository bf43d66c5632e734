use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use relay_core::FailureKind;
use serde::Deserialize;
use thiserror::Error;

use crate::api::SlackApiError;

/// Top-level Events API payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundPayload {
    UrlVerification { challenge: String },
    EventCallback(SlackEnvelope),
    Unsupported { payload_type: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unparseable event payload: {0}")]
pub struct PayloadError(pub String);

impl InboundPayload {
    pub fn parse(body: &[u8]) -> Result<Self, PayloadError> {
        let raw: RawPayload =
            serde_json::from_slice(body).map_err(|error| PayloadError(error.to_string()))?;

        match raw.payload_type.as_str() {
            "url_verification" => {
                let challenge =
                    raw.challenge.ok_or_else(|| PayloadError("missing challenge".to_owned()))?;
                Ok(Self::UrlVerification { challenge })
            }
            "event_callback" => {
                let event_id =
                    raw.event_id.ok_or_else(|| PayloadError("missing event_id".to_owned()))?;
                let event = raw.event.ok_or_else(|| PayloadError("missing event".to_owned()))?;
                Ok(Self::EventCallback(SlackEnvelope { event_id, event: SlackEvent::from_raw(event) }))
            }
            _ => Ok(Self::Unsupported { payload_type: raw.payload_type }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub event_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    AppMention(MessageEvent),
    DirectMessage(MessageEvent),
    AssistantThreadStarted(AssistantThreadEvent),
    AssistantThreadContextChanged(AssistantThreadEvent),
    /// Messages the relay never answers: bot posts, edits, channel chatter.
    Filtered { event_type: String, reason: &'static str },
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::DirectMessage(_) => SlackEventType::DirectMessage,
            Self::AssistantThreadStarted(_) => SlackEventType::AssistantThreadStarted,
            Self::AssistantThreadContextChanged(_) => SlackEventType::AssistantThreadContextChanged,
            Self::Filtered { .. } => SlackEventType::Filtered,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    pub fn thread_ts(&self) -> Option<&str> {
        match self {
            Self::AppMention(event) | Self::DirectMessage(event) => Some(event.reply_thread_ts()),
            Self::AssistantThreadStarted(event) | Self::AssistantThreadContextChanged(event) => {
                Some(&event.thread_ts)
            }
            Self::Filtered { .. } | Self::Unsupported { .. } => None,
        }
    }

    fn from_raw(raw: RawEvent) -> Self {
        match raw.event_type.as_str() {
            "app_mention" | "message" => match raw.filter_reason() {
                Some(reason) => Self::Filtered { event_type: raw.event_type, reason },
                None => {
                    let is_mention = raw.event_type == "app_mention";
                    let message = MessageEvent {
                        channel_id: raw.channel.unwrap_or_default(),
                        user_id: raw.user.unwrap_or_default(),
                        text: raw.text.unwrap_or_default(),
                        ts: raw.ts.unwrap_or_default(),
                        thread_ts: raw.thread_ts,
                    };
                    if is_mention {
                        Self::AppMention(message)
                    } else {
                        Self::DirectMessage(message)
                    }
                }
            },
            "assistant_thread_started" | "assistant_thread_context_changed" => {
                let Some(thread) = raw.assistant_thread.filter(RawAssistantThread::is_complete) else {
                    return Self::Filtered { event_type: raw.event_type, reason: "missing_assistant_thread" };
                };
                let event = AssistantThreadEvent {
                    channel_id: thread.channel_id.unwrap_or_default(),
                    thread_ts: thread.thread_ts.unwrap_or_default(),
                    context_channel_id: thread.context.and_then(|context| context.channel_id),
                };
                if raw.event_type == "assistant_thread_started" {
                    Self::AssistantThreadStarted(event)
                } else {
                    Self::AssistantThreadContextChanged(event)
                }
            }
            _ => Self::Unsupported { event_type: raw.event_type },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    DirectMessage,
    AssistantThreadStarted,
    AssistantThreadContextChanged,
    Filtered,
    Unsupported,
}

impl SlackEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppMention => "app_mention",
            Self::DirectMessage => "direct_message",
            Self::AssistantThreadStarted => "assistant_thread_started",
            Self::AssistantThreadContextChanged => "assistant_thread_context_changed",
            Self::Filtered => "filtered",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
}

impl MessageEvent {
    /// Replies go into the existing thread, or start one under the message.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    pub fn starts_thread(&self) -> bool {
        self.thread_ts.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssistantThreadEvent {
    pub channel_id: String,
    pub thread_ts: String,
    pub context_channel_id: Option<String>,
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(rename = "type")]
    payload_type: String,
    challenge: Option<String>,
    event_id: Option<String>,
    event: Option<RawEvent>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    channel: Option<String>,
    channel_type: Option<String>,
    user: Option<String>,
    text: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    bot_id: Option<String>,
    subtype: Option<String>,
    assistant_thread: Option<RawAssistantThread>,
}

impl RawEvent {
    fn filter_reason(&self) -> Option<&'static str> {
        if self.bot_id.is_some() {
            return Some("bot_message");
        }
        if self.subtype.is_some() {
            return Some("message_subtype");
        }
        if self.event_type == "message" && self.channel_type.as_deref() != Some("im") {
            return Some("not_direct_message");
        }
        if self.channel.is_none() || self.ts.is_none() {
            return Some("missing_channel");
        }
        None
    }
}

#[derive(Deserialize)]
struct RawAssistantThread {
    channel_id: Option<String>,
    thread_ts: Option<String>,
    context: Option<RawThreadContext>,
}

impl RawAssistantThread {
    fn is_complete(&self) -> bool {
        self.channel_id.is_some() && self.thread_ts.is_some()
    }
}

#[derive(Deserialize)]
struct RawThreadContext {
    channel_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
    pub event_id: String,
    pub retry_num: Option<u32>,
}

impl Default for EventContext {
    fn default() -> Self {
        Self {
            correlation_id: "unknown-correlation-id".to_owned(),
            event_id: "unknown-event-id".to_owned(),
            retry_num: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Posted,
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("posting the reply failed: {0}")]
    PostFailed(#[source] SlackApiError),
}

impl EventHandlerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::PostFailed(_) => FailureKind::PostFailed,
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Maps event types to their handler. Built once at startup and shared by
/// every worker.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub fn handles(&self, event_type: SlackEventType) -> bool {
        self.handlers.contains_key(&event_type)
    }

    pub async fn route(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}
