//! Conversation session: history, admission and the streamed exchange.
//!
//! One exchange moves through a strict state machine:
//! - Idle/Settled -> Admitting (send requested)
//! - Admitting -> Drafting (rate limiter admitted the message)
//! - Drafting -> Streaming (generation stream opened)
//! - Streaming -> Settled(success) (stream ended)
//! - Any in-flight state -> Settled(failed) (rate limit, configuration,
//!   transport or provider error)
//!
//! Every state change is published to subscribers as a [`SessionSnapshot`].
//! The state lock is never held across an await.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use urbaneye_core::config::AssistantConfig;
use urbaneye_core::UserIdentity;
use uuid::Uuid;

use crate::context::{system_instruction, ContextAggregator};
use crate::error::AssistantError;
use crate::generation::{
    GenerationError, GenerationParams, GenerationProvider, GenerationRequest, HistoryTurn,
};
use crate::rate_limit::RateLimiter;
use crate::reports::ReportSource;
use crate::types::{
    ExchangeState, Message, MessageId, MessageState, Outcome, Role, SessionSnapshot,
};

/// Capacity of the snapshot broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Most recent complete messages sent to generation.
    pub max_history: usize,
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    pub params: GenerationParams,
    /// Bound on each provider await (stream open and every chunk).
    pub stream_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&AssistantConfig::default())
    }
}

impl From<&AssistantConfig> for SessionConfig {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            max_history: config.max_history,
            rate_limit_max: config.rate_limit_max,
            rate_limit_window: Duration::from_millis(config.rate_limit_window_ms),
            params: GenerationParams::from(config),
            stream_timeout: Duration::from_secs(config.stream_timeout_secs),
        }
    }
}

#[derive(Debug)]
struct SessionState {
    messages: Vec<Message>,
    context_block: String,
    identity: Option<UserIdentity>,
    limiter: RateLimiter,
    exchange: ExchangeState,
    next_id: u64,
    error: Option<String>,
}

impl SessionState {
    fn next_message_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Apply `target` if the transition is valid. Returns whether it was applied.
    fn advance(&mut self, target: ExchangeState) -> bool {
        if self.exchange.can_transition_to(&target) {
            tracing::debug!("Exchange state: {} -> {}", self.exchange, target);
            self.exchange = target;
            true
        } else {
            tracing::warn!(
                "Invalid exchange transition: {} -> {}",
                self.exchange,
                target
            );
            false
        }
    }

    fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.messages.clone(),
            error: self.error.clone(),
            is_streaming: self.exchange.is_in_flight(),
            exchange: self.exchange,
        }
    }
}

/// A single panel's conversation.
///
/// Cheap to clone; clones share the same state, so a send can be spawned and
/// keep accumulating after the caller stops observing.
#[derive(Clone)]
pub struct ConversationSession {
    id: Uuid,
    state: Arc<Mutex<SessionState>>,
    provider: Arc<dyn GenerationProvider>,
    reports: Arc<dyn ReportSource>,
    aggregator: ContextAggregator,
    events: broadcast::Sender<SessionSnapshot>,
    config: SessionConfig,
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("id", &self.id)
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ConversationSession {
    /// Create a signed-out session. No report fetch is made.
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        reports: Arc<dyn ReportSource>,
        config: SessionConfig,
    ) -> Self {
        let aggregator = ContextAggregator::default();
        let context_block = aggregator.build(None, None, chrono::Utc::now());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let state = SessionState {
            messages: Vec::new(),
            context_block,
            identity: None,
            limiter: RateLimiter::new(config.rate_limit_max, config.rate_limit_window),
            exchange: ExchangeState::Idle,
            next_id: 1,
            error: None,
        };

        let id = Uuid::new_v4();
        tracing::info!(session_id = %id, provider = provider.name(), "Assistant session created");

        Self {
            id,
            state: Arc::new(Mutex::new(state)),
            provider,
            reports,
            aggregator,
            events,
            config,
        }
    }

    /// Create a session and build its context for `identity`.
    pub async fn start(
        provider: Arc<dyn GenerationProvider>,
        reports: Arc<dyn ReportSource>,
        config: SessionConfig,
        identity: Option<UserIdentity>,
    ) -> Self {
        let session = Self::new(provider, reports, config);
        session.set_identity(identity).await;
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &SessionState) {
        // No subscribers is fine.
        let _ = self.events.send(state.snapshot());
    }

    /// Receive a snapshot after every state change.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    /// Current context block (without the base guardrails).
    pub fn context_block(&self) -> String {
        self.lock().context_block.clone()
    }

    pub fn identity(&self) -> Option<UserIdentity> {
        self.lock().identity.clone()
    }

    /// Sends left in the current rate-limit window. For display only.
    pub fn remaining(&self) -> usize {
        self.lock().limiter.remaining()
    }

    /// Show `message` as the session error.
    pub fn surface_error(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.error = Some(message.into());
        self.publish(&state);
    }

    pub fn clear_error(&self) {
        let mut state = self.lock();
        if state.error.take().is_some() {
            self.publish(&state);
        }
    }

    /// Apply a login, logout or account switch.
    ///
    /// The context is rebuilt only when the identity actually changes.
    pub async fn set_identity(&self, identity: Option<UserIdentity>) {
        {
            let mut state = self.lock();
            if state.identity == identity {
                return;
            }
            state.identity = identity.clone();
        }

        tracing::info!(
            session_id = %self.id,
            signed_in = identity.is_some(),
            "Assistant identity changed"
        );

        let block = self
            .aggregator
            .refresh(self.reports.as_ref(), identity.as_ref())
            .await;

        let mut state = self.lock();
        // A newer identity change may have landed while fetching.
        if state.identity == identity {
            state.context_block = block;
            self.publish(&state);
        }
    }

    /// Apply an identity together with the backend token it authenticates with.
    ///
    /// The token is installed on the report source before the context is
    /// rebuilt, so a login after a signed-out start fetches as the new user.
    pub async fn set_credentials(&self, identity: Option<UserIdentity>, token: Option<String>) {
        self.reports.set_token(token);
        self.set_identity(identity).await;
    }

    /// Rebuild the context for the current identity.
    pub async fn refresh_context(&self) {
        let identity = self.identity();
        let block = self
            .aggregator
            .refresh(self.reports.as_ref(), identity.as_ref())
            .await;

        let mut state = self.lock();
        if state.identity == identity {
            state.context_block = block;
            self.publish(&state);
        }
    }

    /// Clear the history and error. The rate limiter keeps its window.
    pub fn reset(&self) -> Result<(), AssistantError> {
        let mut state = self.lock();
        if state.exchange.is_in_flight() {
            return Err(AssistantError::ExchangeInFlight);
        }
        state.messages.clear();
        state.error = None;
        state.exchange = ExchangeState::Idle;
        tracing::info!(session_id = %self.id, "Assistant session reset");
        self.publish(&state);
        Ok(())
    }

    /// Run `send` on a background task.
    pub fn spawn_send(
        &self,
        text: impl Into<String>,
    ) -> JoinHandle<Result<MessageId, AssistantError>> {
        let session = self.clone();
        let text = text.into();
        tokio::spawn(async move { session.send(&text).await })
    }

    /// Send a user message and stream the assistant's reply into the history.
    ///
    /// Returns the id of the completed assistant message.
    pub async fn send(&self, text: &str) -> Result<MessageId, AssistantError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AssistantError::EmptyMessage);
        }

        let (placeholder, request) = self.admit(text)?;
        let mut exchange = InFlight {
            session: self,
            placeholder,
            settled: false,
        };

        let timeout = self.config.stream_timeout;
        let opened = tokio::time::timeout(timeout, self.provider.generate_stream(&request)).await;
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(exchange.fail(e.into())),
            Err(_) => return Err(exchange.fail(GenerationError::Timeout(timeout).into())),
        };

        {
            let mut state = self.lock();
            state.advance(ExchangeState::Streaming);
            if let Some(message) = state.message_mut(placeholder) {
                message.state = MessageState::Streaming;
            }
            self.publish(&state);
        }

        let mut chunks = 0usize;
        loop {
            match tokio::time::timeout(timeout, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    chunks += 1;
                    tracing::debug!(message_id = %placeholder, len = chunk.len(), "Chunk received");
                    let mut state = self.lock();
                    if let Some(message) = state.message_mut(placeholder) {
                        message.text.push_str(&chunk);
                    }
                    self.publish(&state);
                }
                Ok(Some(Err(e))) => return Err(exchange.fail(e.into())),
                Ok(None) => break,
                Err(_) => return Err(exchange.fail(GenerationError::Timeout(timeout).into())),
            }
        }

        exchange.complete(chunks);
        Ok(placeholder)
    }

    /// Admitting and Drafting: rate limit, append both messages and build the request.
    fn admit(&self, text: &str) -> Result<(MessageId, GenerationRequest), AssistantError> {
        let mut state = self.lock();
        if !state.advance(ExchangeState::Admitting) {
            return Err(AssistantError::ExchangeInFlight);
        }

        if !state.limiter.can_send() {
            let err = AssistantError::RateLimitExceeded {
                retry_after: state.limiter.retry_after(),
            };
            state.advance(ExchangeState::Settled(Outcome::Failed));
            state.error = Some(err.to_string());
            tracing::warn!(session_id = %self.id, "Assistant send rate limited");
            self.publish(&state);
            return Err(err);
        }
        state.limiter.record();

        let user_id = state.next_message_id();
        state.messages.push(Message {
            id: user_id,
            role: Role::User,
            text: text.to_string(),
            state: MessageState::Complete,
        });
        let placeholder = state.next_message_id();
        state.messages.push(Message {
            id: placeholder,
            role: Role::Assistant,
            text: String::new(),
            state: MessageState::Pending,
        });
        state.error = None;
        state.advance(ExchangeState::Drafting);

        let request = GenerationRequest {
            system_instruction: system_instruction(&state.context_block),
            history: bounded_history(&state.messages, self.config.max_history),
            params: self.config.params,
        };

        tracing::info!(
            session_id = %self.id,
            message_id = %user_id,
            history_len = request.history.len(),
            "Assistant message admitted"
        );
        self.publish(&state);
        Ok((placeholder, request))
    }
}

/// The last `max` complete, non-empty messages, oldest first.
fn bounded_history(messages: &[Message], max: usize) -> Vec<HistoryTurn> {
    let complete: Vec<&Message> = messages
        .iter()
        .filter(|m| m.state == MessageState::Complete && !m.text.is_empty())
        .collect();
    let skip = complete.len().saturating_sub(max);
    complete[skip..]
        .iter()
        .map(|m| HistoryTurn {
            role: m.role,
            text: m.text.clone(),
        })
        .collect()
}

/// Settles the exchange exactly once, including when the send future is dropped.
struct InFlight<'a> {
    session: &'a ConversationSession,
    placeholder: MessageId,
    settled: bool,
}

impl InFlight<'_> {
    fn complete(&mut self, chunks: usize) {
        let session = self.session;
        let mut state = session.lock();
        if let Some(message) = state.message_mut(self.placeholder) {
            message.state = MessageState::Complete;
        }
        state.advance(ExchangeState::Settled(Outcome::Success));
        self.settled = true;
        tracing::info!(
            session_id = %session.id,
            message_id = %self.placeholder,
            chunks,
            "Assistant reply complete"
        );
        session.publish(&state);
    }

    /// Drop the placeholder, keep the user message and surface `err`.
    fn fail(&mut self, err: AssistantError) -> AssistantError {
        let session = self.session;
        let mut state = session.lock();
        let placeholder = self.placeholder;
        state.messages.retain(|m| m.id != placeholder);
        state.advance(ExchangeState::Settled(Outcome::Failed));
        state.error = Some(err.to_string());
        self.settled = true;
        tracing::warn!(session_id = %session.id, error = %err, "Assistant exchange failed");
        session.publish(&state);
        err
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.fail(AssistantError::TransportFailure(
                "reply was cancelled".to_string(),
            ));
        }
    }
}
