pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod fallback;
pub mod format;
pub mod rate_limit;
pub mod retry;
pub mod sanitize;

pub use dedup::{DedupStore, InMemoryDedupStore};
pub use domain::answer::{AnswerProvenance, Citation, ReasoningEffort, SynthesizedAnswer};
pub use domain::message::{FormattedMessage, Footnote, PipelineOutcome};
pub use domain::query::{Query, Question};
pub use domain::search::{SearchResult, MAX_SEARCH_RESULTS};
pub use errors::{FailureKind, PipelineError};
pub use fallback::{FallbackGenerator, FallbackTable, FallbackTopic};
pub use format::{format_answer, FormatOptions, ResponseFormatter};
pub use rate_limit::{RateDecision, RateLimiter, SlidingWindowLimiter};
pub use retry::RetryPolicy;
