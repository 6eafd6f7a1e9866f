//! Message and session state types observed by the UI.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, monotonically increasing message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Lifecycle of a single message's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    /// Placeholder created, no text received yet.
    Pending,
    /// Text is growing chunk by chunk.
    Streaming,
    /// Text is final.
    Complete,
}

/// One entry in the on-screen conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub state: MessageState,
}

/// How a settled exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

/// State of the current (or most recent) exchange.
///
/// Valid transitions:
/// - Idle/Settled -> Admitting (send requested)
/// - Admitting -> Drafting (admitted by the rate limiter)
/// - Admitting -> Settled(Failed) (rate limited)
/// - Drafting -> Streaming (stream opened)
/// - Drafting -> Settled(Failed) (configuration or transport error)
/// - Streaming -> Settled(Success | Failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    Idle,
    Admitting,
    Drafting,
    Streaming,
    Settled(Outcome),
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeState::Idle => write!(f, "Idle"),
            ExchangeState::Admitting => write!(f, "Admitting"),
            ExchangeState::Drafting => write!(f, "Drafting"),
            ExchangeState::Streaming => write!(f, "Streaming"),
            ExchangeState::Settled(Outcome::Success) => write!(f, "Settled(success)"),
            ExchangeState::Settled(Outcome::Failed) => write!(f, "Settled(failed)"),
        }
    }
}

impl ExchangeState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &ExchangeState) -> bool {
        use ExchangeState::*;
        matches!(
            (self, target),
            (Idle, Admitting)
                | (Settled(_), Admitting)
                | (Admitting, Drafting)
                | (Admitting, Settled(Outcome::Failed))
                | (Drafting, Streaming)
                | (Drafting, Settled(Outcome::Failed))
                | (Streaming, Settled(_))
        )
    }

    /// Whether an exchange is currently occupying the session.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ExchangeState::Admitting | ExchangeState::Drafting | ExchangeState::Streaming
        )
    }
}

/// Everything the UI needs to render the assistant panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    /// Human-readable error from the last failed operation, if any.
    pub error: Option<String>,
    pub is_streaming: bool,
    pub exchange: ExchangeState,
}
