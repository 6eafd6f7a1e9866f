//! Error types for the conversational assistant.

use std::time::Duration;

use crate::generation::GenerationError;
use crate::types::MessageId;

/// Errors surfaced by the session and the panel.
///
/// None of these are fatal: every variant is converted into human-readable
/// session error text at the panel boundary.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error(
        "rate limit exceeded, try again in {}s",
        .retry_after.as_secs_f64().ceil().max(1.0)
    )]
    RateLimitExceeded { retry_after: Duration },
    #[error("assistant is not configured: {0}")]
    ConfigurationMissing(String),
    #[error("failed to get a response: {0}")]
    TransportFailure(String),
    #[error("voice input is not supported on this device")]
    RecognitionUnavailable,
    #[error("voice output is not supported on this device")]
    SynthesisUnavailable,
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("a reply is still being generated")]
    ExchangeInFlight,
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),
    #[error("no quick action number {0}")]
    UnknownQuickAction(usize),
}

impl From<GenerationError> for AssistantError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::NotConfigured(msg) => AssistantError::ConfigurationMissing(msg),
            other => AssistantError::TransportFailure(other.to_string()),
        }
    }
}

impl From<urbaneye_core::UrbanEyeError> for AssistantError {
    fn from(err: urbaneye_core::UrbanEyeError) -> Self {
        AssistantError::ConfigurationMissing(err.to_string())
    }
}
