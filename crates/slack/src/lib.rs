//! Slack Events API front end for the relay.
//!
//! - **Ingress** (`dispatch`) - signature check, parse, dedup and enqueue
//!   inside the 3-second acknowledgment window
//! - **Events** (`events`) - payload model and the handler router
//! - **Handlers** (`handlers`) - question answering, thread welcome, context
//!   tracking
//! - **Workers** (`worker`) - bounded pool that runs handlers off the request
//!   path
//! - **Outbound** (`api`, `status`, `message`) - Web API client, assistant
//!   status indicator and message payloads
//!
//! ```text
//! POST /slack/events → EventDispatcher::accept → WorkerPool → EventRouter
//!                             ↓                                   ↓
//!                        200 / 401 / 400                 QuestionHandler → SlackApi
//! ```

pub mod api;
pub mod dispatch;
pub mod events;
pub mod handlers;
pub mod lifecycle;
pub mod message;
pub mod signature;
pub mod status;
pub mod worker;

#[cfg(test)]
mod testing;

pub use api::{PostedMessage, SlackApi, SlackApiError, SlackWebClient};
pub use dispatch::{AcceptError, Acknowledgement, EventDispatcher, InboundRequest};
pub use events::{EventRouter, SlackEnvelope, SlackEvent, SlackEventType};
pub use handlers::{build_router, HandlerSettings, QuestionAnswerer};
pub use signature::{compute_signature, SignatureError, SignatureVerifier};
pub use worker::{WorkerPool, WorkerSettings};
