//! Conversational assistant for UrbanEye.
//!
//! Aggregates the signed-in user's reports into a context block, enforces a
//! sliding-window send limit, streams generated replies into a bounded
//! conversation history, and bridges to speech input and output.

pub mod context;
pub mod error;
pub mod generation;
pub mod panel;
pub mod rate_limit;
pub mod reports;
pub mod session;
pub mod types;
pub mod voice;

pub use context::{system_instruction, ContextAggregator, ReportAnalytics};
pub use error::AssistantError;
pub use generation::{
    GeminiConfig, GeminiProvider, GenerationError, GenerationParams, GenerationProvider,
    GenerationRequest, HistoryTurn, ScriptedProvider, TextStream,
};
pub use panel::{AssistantPanel, VoiceToggle, QUICK_ACTIONS};
pub use rate_limit::RateLimiter;
pub use reports::{HttpReportSource, ReportSource, ReportSourceError, StaticReportSource};
pub use session::{ConversationSession, SessionConfig};
pub use types::{
    ExchangeState, Message, MessageId, MessageState, Outcome, Role, SessionSnapshot,
};
pub use voice::{
    detect_locale, RecognitionEvent, SpeechEnd, SpeechRecognizer, SpeechSynthesizer,
    UnsupportedRecognizer, UnsupportedSynthesizer, Utterance, VoiceBridge,
};
