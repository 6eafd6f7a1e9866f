//! Voice bridge: speech input into the compose field and spoken replies.
//!
//! The bridge never touches session state. Recognition produces candidate
//! input text in the compose buffer; synthesis reads completed assistant
//! text aloud. Platform speech engines plug in through [`SpeechRecognizer`]
//! and [`SpeechSynthesizer`].

use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use urbaneye_core::config::VoiceConfig;

use crate::error::AssistantError;
use crate::types::MessageId;

/// English (India).
pub const ENGLISH_INDIA: &str = "en-IN";

/// Hindi (India).
pub const HINDI_INDIA: &str = "hi-IN";

/// Unicode Devanagari block.
pub const DEVANAGARI: RangeInclusive<char> = '\u{0900}'..='\u{097F}';

/// Whether `text` contains any Devanagari character.
pub fn contains_devanagari(text: &str) -> bool {
    text.chars().any(|c| DEVANAGARI.contains(&c))
}

/// Locale to speak `text` in.
pub fn detect_locale(text: &str) -> &'static str {
    if contains_devanagari(text) {
        HINDI_INDIA
    } else {
        ENGLISH_INDIA
    }
}

// ---------------------------------------------------------------------------
// Platform seams
// ---------------------------------------------------------------------------

/// Event emitted by a recognizer while listening.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Interim hypothesis; discarded by the bridge.
    Partial(String),
    /// Final transcript.
    Final(String),
    /// Recognition failed (no speech, permission denied, ...).
    Error(String),
}

/// Events from one listening pass. Ends when the recognizer stops.
pub type RecognitionStream = Pin<Box<dyn Stream<Item = RecognitionEvent> + Send>>;

/// Platform speech recognizer, one locale at a time, non-continuous.
pub trait SpeechRecognizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Begin a single listening pass in `locale`.
    fn start(&self, locale: &str) -> Result<RecognitionStream, AssistantError>;

    /// Stop listening; the current stream ends.
    fn stop(&self);
}

/// One spoken reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub locale: String,
    pub rate: f32,
    pub pitch: f32,
}

/// How an utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEnd {
    Completed,
    Interrupted,
}

/// Platform speech synthesizer.
pub trait SpeechSynthesizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Begin speaking. The receiver resolves when the utterance ends or is
    /// interrupted.
    fn speak(
        &self,
        utterance: Utterance,
    ) -> Result<oneshot::Receiver<SpeechEnd>, AssistantError>;

    /// Interrupt whatever is being spoken.
    fn cancel(&self);
}

/// Recognizer for environments without speech input.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedRecognizer;

impl SpeechRecognizer for UnsupportedRecognizer {
    fn is_available(&self) -> bool {
        false
    }

    fn start(&self, _locale: &str) -> Result<RecognitionStream, AssistantError> {
        Err(AssistantError::RecognitionUnavailable)
    }

    fn stop(&self) {}
}

/// Synthesizer for environments without speech output.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSynthesizer;

impl SpeechSynthesizer for UnsupportedSynthesizer {
    fn is_available(&self) -> bool {
        false
    }

    fn speak(
        &self,
        _utterance: Utterance,
    ) -> Result<oneshot::Receiver<SpeechEnd>, AssistantError> {
        Err(AssistantError::SynthesisUnavailable)
    }

    fn cancel(&self) {}
}

// ---------------------------------------------------------------------------
// VoiceBridge
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct VoiceState {
    recording: bool,
    /// Bumped on every start/stop so a stale listening pass can tell.
    listen_seq: u64,
    /// `true` when the alternate locale is selected for recognition.
    alternate: bool,
    compose: String,
    speaking: Option<MessageId>,
    /// Bumped on every utterance so a stale completion can tell.
    speech_seq: u64,
}

/// Connects platform speech engines to the assistant panel.
pub struct VoiceBridge {
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    config: VoiceConfig,
    state: Mutex<VoiceState>,
}

impl std::fmt::Debug for VoiceBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceBridge")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl VoiceBridge {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: VoiceConfig,
    ) -> Self {
        Self {
            recognizer,
            synthesizer,
            config,
            state: Mutex::new(VoiceState {
                recording: false,
                listen_seq: 0,
                alternate: false,
                compose: String::new(),
                speaking: None,
                speech_seq: 0,
            }),
        }
    }

    /// A bridge with neither input nor output available.
    pub fn unsupported(config: VoiceConfig) -> Self {
        Self::new(
            Arc::new(UnsupportedRecognizer),
            Arc::new(UnsupportedSynthesizer),
            config,
        )
    }

    fn lock(&self) -> MutexGuard<'_, VoiceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn recognition_available(&self) -> bool {
        self.recognizer.is_available()
    }

    pub fn synthesis_available(&self) -> bool {
        self.synthesizer.is_available()
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    /// Recognition locale currently selected.
    pub fn locale(&self) -> String {
        if self.lock().alternate {
            self.config.alternate_locale.clone()
        } else {
            self.config.default_locale.clone()
        }
    }

    /// Switch the recognition locale. Stops an active recording first.
    pub fn toggle_locale(&self) -> String {
        self.stop_listening();
        {
            let mut state = self.lock();
            state.alternate = !state.alternate;
        }
        let locale = self.locale();
        tracing::info!(locale = %locale, "Voice input locale changed");
        locale
    }

    // ---- Compose buffer ----

    pub fn compose(&self) -> String {
        self.lock().compose.clone()
    }

    pub fn set_compose(&self, text: impl Into<String>) {
        self.lock().compose = text.into();
    }

    /// Take the compose text, leaving the buffer empty.
    pub fn take_compose(&self) -> String {
        std::mem::take(&mut self.lock().compose)
    }

    // ---- Recognition ----

    /// Open a listening pass. Pair with [`VoiceBridge::finish_listening`].
    pub fn start_listening(&self) -> Result<ListeningPass, AssistantError> {
        if !self.recognizer.is_available() {
            return Err(AssistantError::RecognitionUnavailable);
        }
        if self.is_recording() {
            self.stop_listening();
        }

        let locale = self.locale();
        let events = self.recognizer.start(&locale)?;

        let mut state = self.lock();
        state.recording = true;
        state.listen_seq += 1;
        tracing::info!(locale = %locale, "Voice input started");
        Ok(ListeningPass {
            seq: state.listen_seq,
            events,
        })
    }

    /// Wait for the pass to end. A final transcript replaces the compose text
    /// and is returned; errors and end-without-result return `None`.
    pub async fn finish_listening(&self, pass: ListeningPass) -> Option<String> {
        let ListeningPass { seq, mut events } = pass;

        while let Some(event) = events.next().await {
            match event {
                RecognitionEvent::Partial(text) => {
                    tracing::debug!(len = text.len(), "Interim transcript discarded");
                }
                RecognitionEvent::Final(text) => {
                    let accepted = {
                        let mut state = self.lock();
                        if state.recording && state.listen_seq == seq {
                            state.recording = false;
                            state.compose = text.clone();
                            true
                        } else {
                            false
                        }
                    };
                    if !accepted {
                        return None;
                    }
                    self.recognizer.stop();
                    tracing::info!(len = text.len(), "Voice input transcribed");
                    return Some(text);
                }
                RecognitionEvent::Error(reason) => {
                    tracing::warn!(reason = %reason, "Voice input failed");
                    self.end_pass(seq);
                    return None;
                }
            }
        }

        tracing::debug!("Voice input ended without a result");
        self.end_pass(seq);
        None
    }

    /// Start listening and wait for the transcript.
    pub async fn listen(&self) -> Result<Option<String>, AssistantError> {
        let pass = self.start_listening()?;
        Ok(self.finish_listening(pass).await)
    }

    /// Stop an active recording and return to idle.
    pub fn stop_listening(&self) {
        let was_recording = {
            let mut state = self.lock();
            let was_recording = state.recording;
            state.recording = false;
            state.listen_seq += 1;
            was_recording
        };
        if was_recording {
            self.recognizer.stop();
            tracing::info!("Voice input stopped");
        }
    }

    fn end_pass(&self, seq: u64) {
        let mut state = self.lock();
        if state.listen_seq == seq {
            state.recording = false;
        }
    }

    // ---- Synthesis ----

    /// Message currently being read aloud.
    pub fn speaking(&self) -> Option<MessageId> {
        self.lock().speaking
    }

    /// Read `text` aloud as message `id`, interrupting any current utterance.
    /// Resolves when the utterance completes or is interrupted.
    pub async fn speak(&self, id: MessageId, text: &str) -> Result<SpeechEnd, AssistantError> {
        if !self.synthesizer.is_available() {
            return Err(AssistantError::SynthesisUnavailable);
        }

        self.synthesizer.cancel();
        let utterance = Utterance {
            text: text.to_string(),
            locale: detect_locale(text).to_string(),
            rate: self.config.rate,
            pitch: self.config.pitch,
        };
        tracing::info!(message_id = %id, locale = %utterance.locale, "Speaking assistant reply");

        let done = self.synthesizer.speak(utterance)?;
        let seq = {
            let mut state = self.lock();
            state.speech_seq += 1;
            state.speaking = Some(id);
            state.speech_seq
        };
        let mut guard = SpeechGuard {
            bridge: self,
            seq,
            ended: false,
        };

        // A dropped sender means the engine went away mid-utterance.
        let end = done.await.unwrap_or(SpeechEnd::Interrupted);
        guard.ended = true;
        Ok(end)
    }

    /// Interrupt speech and clear the speaking id.
    pub fn stop_speaking(&self) {
        self.synthesizer.cancel();
        let mut state = self.lock();
        state.speech_seq += 1;
        state.speaking = None;
    }
}

/// Clears the speaking id when an utterance ends or its `speak` future is dropped.
struct SpeechGuard<'a> {
    bridge: &'a VoiceBridge,
    seq: u64,
    ended: bool,
}

impl Drop for SpeechGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.bridge.lock();
        if state.speech_seq != self.seq {
            return;
        }
        state.speaking = None;
        if !self.ended {
            drop(state);
            tracing::debug!("Speech abandoned by caller; cancelling utterance");
            self.bridge.synthesizer.cancel();
        }
    }
}

/// One listening pass opened by [`VoiceBridge::start_listening`].
pub struct ListeningPass {
    seq: u64,
    events: RecognitionStream,
}

impl std::fmt::Debug for ListeningPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListeningPass").field("seq", &self.seq).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
