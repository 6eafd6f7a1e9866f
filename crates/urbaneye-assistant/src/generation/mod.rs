//! Language-generation provider abstraction.
//!
//! The assistant never generates text itself. It hands a system instruction
//! and a bounded history to a [`GenerationProvider`], which either returns a
//! completed reply or a lazy, finite stream of text chunks whose
//! concatenation is the reply.

pub mod gemini;
pub mod scripted;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use urbaneye_core::config::AssistantConfig;

use crate::types::Role;

pub use gemini::{GeminiConfig, GeminiProvider};
pub use scripted::ScriptedProvider;

/// Error type for provider operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider rate limited the request")]
    RateLimited,
    #[error("response blocked by content filter")]
    ContentFiltered,
    #[error("no response within {}s", .0.as_secs_f32())]
    Timeout(Duration),
}

/// Incremental reply text. Ends after the last chunk or the first error.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// One prior message as seen by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

/// Sampling parameters for a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_output_tokens: 300,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl From<&AssistantConfig> for GenerationParams {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

/// Everything a provider needs to produce one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_instruction: String,
    /// Oldest first; the last turn is the user message being answered.
    pub history: Vec<HistoryTurn>,
    pub params: GenerationParams,
}

/// A language-generation backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Generate a complete reply.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Open a streamed reply.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, GenerationError>;
}
