use std::sync::Arc;

use relay_core::DedupStore;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventContext, EventRouter, InboundPayload, PayloadError};
use crate::lifecycle::{EventLifecycle, EventState, LifecycleError};
use crate::signature::{SignatureError, SignatureVerifier};
use crate::worker::{SubmitError, WorkItem, WorkerPool};

/// Raw pieces of an Events API request as received over HTTP.
#[derive(Clone, Copy, Debug)]
pub struct InboundRequest<'a> {
    pub body: &'a [u8],
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub retry_num: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acknowledgement {
    Challenge(String),
    Accepted { event_id: String, correlation_id: String },
    Duplicate { event_id: String },
    Ignored { event_type: String },
    Shed { event_id: String },
}

impl Acknowledgement {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Challenge(_) => "challenge",
            Self::Accepted { .. } => "accepted",
            Self::Duplicate { .. } => "duplicate",
            Self::Ignored { .. } => "ignored",
            Self::Shed { .. } => "shed",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcceptError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Request-path front door: verify, parse, dedup and enqueue. Performs no
/// network I/O so the acknowledgment is never held up by pipeline work.
pub struct EventDispatcher {
    verifier: Option<SignatureVerifier>,
    dedup: Arc<dyn DedupStore>,
    router: Arc<EventRouter>,
    pool: WorkerPool,
}

impl EventDispatcher {
    /// `verifier: None` disables signature checks (local development only).
    pub fn new(
        verifier: Option<SignatureVerifier>,
        dedup: Arc<dyn DedupStore>,
        router: Arc<EventRouter>,
        pool: WorkerPool,
    ) -> Self {
        Self { verifier, dedup, router, pool }
    }

    pub fn verifies_signatures(&self) -> bool {
        self.verifier.is_some()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn accept(&self, request: &InboundRequest<'_>) -> Result<Acknowledgement, AcceptError> {
        if let Some(verifier) = &self.verifier {
            if let Err(error) = verifier.verify(request.timestamp, request.signature, request.body) {
                warn!(
                    event_name = "ingress.slack.signature_rejected",
                    error = %error,
                    "rejecting unsigned or mis-signed request"
                );
                return Err(error.into());
            }
        }

        let envelope = match InboundPayload::parse(request.body)? {
            InboundPayload::UrlVerification { challenge } => {
                info!(event_name = "ingress.slack.url_verification", "answering url verification");
                return Ok(Acknowledgement::Challenge(challenge));
            }
            InboundPayload::Unsupported { payload_type } => {
                debug!(event_name = "ingress.slack.ignored", payload_type = %payload_type, "unsupported payload");
                return Ok(Acknowledgement::Ignored { event_type: payload_type });
            }
            InboundPayload::EventCallback(envelope) => envelope,
        };
        let event_id = envelope.event_id.clone();
        let event_type = envelope.event.event_type();
        let mut lifecycle = EventLifecycle::received(event_id.clone());

        if !self.dedup.check_and_mark(&event_id) {
            info!(
                event_name = "ingress.slack.duplicate",
                event_id = %event_id,
                retry_num = request.retry_num.unwrap_or(0),
                "duplicate delivery dropped"
            );
            return Ok(Acknowledgement::Duplicate { event_id });
        }

        if !self.router.handles(event_type) {
            debug!(
                event_name = "ingress.slack.ignored",
                event_id = %event_id,
                event_type = event_type.as_str(),
                "no handler for event"
            );
            return Ok(Acknowledgement::Ignored { event_type: event_type.as_str().to_owned() });
        }

        let correlation_id = Uuid::new_v4().to_string();
        lifecycle.transition_to(EventState::Acknowledged)?;
        let context = EventContext {
            correlation_id: correlation_id.clone(),
            event_id: event_id.clone(),
            retry_num: request.retry_num,
        };
        let thread_id = envelope.event.thread_ts().unwrap_or("unknown").to_owned();

        match self.pool.try_submit(WorkItem { envelope, context, lifecycle }) {
            Ok(()) => {
                info!(
                    event_name = "ingress.slack.ack_sent",
                    event_id = %event_id,
                    correlation_id = %correlation_id,
                    event_type = event_type.as_str(),
                    thread_id = %thread_id,
                    "event acknowledged and queued"
                );
                Ok(Acknowledgement::Accepted { event_id, correlation_id })
            }
            Err(SubmitError::Full) | Err(SubmitError::Closed) => {
                warn!(
                    event_name = "ingress.slack.shed",
                    event_id = %event_id,
                    correlation_id = %correlation_id,
                    event_type = event_type.as_str(),
                    thread_id = %thread_id,
                    "worker queue saturated; event shed"
                );
                Ok(Acknowledgement::Shed { event_id })
            }
        }
    }
}
