//! Answer pipeline for Slack questions.
//!
//! A question flows through four stages:
//! 1. **Sanitize** (`relay_core::sanitize`) - normalize the raw Slack text
//! 2. **Search** (`search`) - fetch ranked web results with bounded retries
//! 3. **Synthesize** (`synthesis`) - ask a reasoning model for a cited answer
//! 4. **Format** (`relay_core::format`) - turn citations into Slack footnotes
//!
//! `pipeline::AnswerPipeline` wires the stages together and converts every
//! stage failure into a fallback message, so callers always get something to
//! post.

pub mod http;
pub mod llm;
pub mod pipeline;
pub mod search;
pub mod synthesis;

pub use http::ProviderError;
pub use llm::{ChatMessage, Completion, CompletionRequest, LlmClient, OpenAiChatClient};
pub use pipeline::{AnswerPipeline, PipelineBudget, PipelineSettings};
pub use search::{BraveSearchProvider, SearchClient, SearchProvider, SearchRequest, SearchSettings};
pub use synthesis::{extract_citations, AnswerSynthesizer, SynthesisSettings};
