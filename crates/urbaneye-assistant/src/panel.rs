//! UI-facing facade over one conversation session and one voice bridge.
//!
//! Every error that reaches the panel is also written into the session's
//! error text so the UI can render it without inspecting the `Result`.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use urbaneye_core::UserIdentity;

use crate::error::AssistantError;
use crate::session::ConversationSession;
use crate::types::{MessageId, MessageState, Role, SessionSnapshot};
use crate::voice::{SpeechEnd, VoiceBridge};

/// Starter prompts offered while the conversation is empty.
pub const QUICK_ACTIONS: [&str; 4] = [
    "How do I report an issue?",
    "What issues can AI detect?",
    "How does XP work?",
    "Book a gig worker",
];

/// Result of toggling voice input.
#[derive(Debug)]
pub enum VoiceToggle {
    /// Listening started; the handle yields the final transcript, if any.
    Listening(JoinHandle<Option<String>>),
    /// An active recording was stopped.
    Stopped,
}

/// The assistant panel.
#[derive(Debug, Clone)]
pub struct AssistantPanel {
    session: ConversationSession,
    voice: Arc<VoiceBridge>,
}

impl AssistantPanel {
    pub fn new(session: ConversationSession, voice: VoiceBridge) -> Self {
        Self {
            session,
            voice: Arc::new(voice),
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn voice(&self) -> &VoiceBridge {
        &self.voice
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Send `text` and stream the reply.
    pub async fn send(&self, text: &str) -> Result<MessageId, AssistantError> {
        let result = self.session.send(text).await;
        if let Err(AssistantError::ExchangeInFlight) = &result {
            self.session
                .surface_error(AssistantError::ExchangeInFlight.to_string());
        }
        result
    }

    /// Starter prompts to show, or none once the conversation has begun.
    pub fn quick_actions(&self) -> &'static [&'static str] {
        if self.session.snapshot().messages.is_empty() {
            &QUICK_ACTIONS
        } else {
            &[]
        }
    }

    /// Send one of [`QUICK_ACTIONS`] by position.
    pub async fn send_quick_action(&self, index: usize) -> Result<MessageId, AssistantError> {
        let prompt = QUICK_ACTIONS
            .get(index)
            .ok_or_else(|| self.surface(AssistantError::UnknownQuickAction(index)))?;
        self.send(prompt).await
    }

    /// Send whatever is in the compose buffer.
    ///
    /// The buffer is restored when the message was not accepted.
    pub async fn send_composed(&self) -> Result<MessageId, AssistantError> {
        let text = self.voice.take_compose();
        let result = self.send(&text).await;
        if let Err(
            AssistantError::EmptyMessage
            | AssistantError::ExchangeInFlight
            | AssistantError::RateLimitExceeded { .. },
        ) = &result
        {
            self.voice.set_compose(text);
        }
        result
    }

    /// Start listening, or stop if already recording.
    pub fn toggle_voice_input(&self) -> Result<VoiceToggle, AssistantError> {
        if self.voice.is_recording() {
            self.voice.stop_listening();
            return Ok(VoiceToggle::Stopped);
        }

        let pass = self
            .voice
            .start_listening()
            .map_err(|e| self.surface(e))?;
        self.session.clear_error();

        let voice = self.voice.clone();
        let handle = tokio::spawn(async move { voice.finish_listening(pass).await });
        Ok(VoiceToggle::Listening(handle))
    }

    pub fn toggle_locale(&self) -> String {
        self.voice.toggle_locale()
    }

    /// Read a completed assistant message aloud.
    ///
    /// Resolves when the utterance ends; spawn it to keep the UI responsive.
    pub async fn speak(&self, id: MessageId) -> Result<SpeechEnd, AssistantError> {
        let text = self
            .session
            .snapshot()
            .messages
            .into_iter()
            .find(|m| {
                m.id == id && m.role == Role::Assistant && m.state == MessageState::Complete
            })
            .map(|m| m.text)
            .ok_or_else(|| self.surface(AssistantError::MessageNotFound(id)))?;

        self.voice
            .speak(id, &text)
            .await
            .map_err(|e| self.surface(e))
    }

    pub fn stop_speaking(&self) {
        self.voice.stop_speaking();
    }

    /// Message currently being read aloud.
    pub fn speaking(&self) -> Option<MessageId> {
        self.voice.speaking()
    }

    pub async fn set_identity(&self, identity: Option<UserIdentity>) {
        self.session.set_identity(identity).await;
    }

    /// Log in, switch account or log out (`None, None`).
    pub async fn set_credentials(&self, identity: Option<UserIdentity>, token: Option<String>) {
        self.session.set_credentials(identity, token).await;
    }

    /// Clear the conversation.
    pub fn reset(&self) -> Result<(), AssistantError> {
        self.session.reset().map_err(|e| self.surface(e))
    }

    fn surface(&self, err: AssistantError) -> AssistantError {
        self.session.surface_error(err.to_string());
        err
    }
}
