//! AI capability shapes for termweave.
//!
//! This crate defines the contract between the session core and whatever
//! model backend the application wires in: the translate / analyze-error
//! request and response records, the embedding provider used by the hybrid
//! history cache, the dangerous-command screen applied before anything is
//! dispatched, and the bounded error-analysis retry loop.
//!
//! There is deliberately no HTTP client here. Backends implement
//! [`Translator`] and [`EmbeddingProvider`]; the core only consumes the
//! traits.

pub mod capability;
pub mod retry;
pub mod safety;
pub mod types;

pub use capability::{AiError, EmbeddingProvider, Translator, TranslationContext};
pub use retry::{ErrorRetryLoop, ExecOutcome, RetryEvent, RetryStatus, DEFAULT_MAX_ATTEMPTS};
pub use safety::dangerous_reason;
pub use types::{CommandTranslation, ErrorAnalysis, RiskLevel};
