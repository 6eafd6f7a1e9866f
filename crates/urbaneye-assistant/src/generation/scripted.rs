//! Scripted provider for tests and offline runs.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{GenerationError, GenerationProvider, GenerationRequest, TextStream};
use crate::types::Role;

#[derive(Debug, Clone)]
enum Script {
    /// Yield these chunks, then end.
    Chunks(Vec<String>),
    /// Fail when the stream is opened.
    FailOnOpen(GenerationError),
    /// Yield these chunks, then fail.
    FailAfter(Vec<String>, GenerationError),
    /// Open a stream that never yields.
    Stall,
    /// Echo the last user turn back word by word.
    Echo,
}

/// Provider that replays a fixed script and records what it was asked.
pub struct ScriptedProvider {
    script: Script,
    chunk_delay: Duration,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            chunk_delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `chunks` in order.
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Chunks(chunks.into_iter().map(Into::into).collect()))
    }

    /// Fail before any chunk is produced.
    pub fn failing(error: GenerationError) -> Self {
        Self::with_script(Script::FailOnOpen(error))
    }

    /// Produce `chunks`, then fail mid-stream.
    pub fn failing_after<I, S>(chunks: I, error: GenerationError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::FailAfter(
            chunks.into_iter().map(Into::into).collect(),
            error,
        ))
    }

    /// Open a stream that never produces a chunk.
    pub fn stalled() -> Self {
        Self::with_script(Script::Stall)
    }

    /// Repeat the user's last message back, one word per chunk.
    pub fn echo() -> Self {
        Self::with_script(Script::Echo)
    }

    /// Sleep between chunks.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests().pop()
    }

    fn remember(&self, request: &GenerationRequest) {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
    }

    fn items(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<Result<String, GenerationError>>, GenerationError> {
        match &self.script {
            Script::Chunks(chunks) => Ok(chunks.iter().cloned().map(Ok).collect()),
            Script::FailOnOpen(error) => Err(error.clone()),
            Script::FailAfter(chunks, error) => {
                let mut items: Vec<_> = chunks.iter().cloned().map(Ok).collect();
                items.push(Err(error.clone()));
                Ok(items)
            }
            Script::Stall => Ok(Vec::new()),
            Script::Echo => Ok(echo_chunks(request).into_iter().map(Ok).collect()),
        }
    }
}

fn echo_chunks(request: &GenerationRequest) -> Vec<String> {
    let last_user = request
        .history
        .iter()
        .rev()
        .find(|turn| turn.role == Role::User)
        .map(|turn| turn.text.as_str())
        .unwrap_or_default();

    let reply = format!("You said: {}", last_user);
    let mut chunks = Vec::new();
    for (i, word) in reply.split_whitespace().enumerate() {
        if i == 0 {
            chunks.push(word.to_string());
        } else {
            chunks.push(format!(" {}", word));
        }
    }
    chunks
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.remember(request);
        if matches!(self.script, Script::Stall) {
            return Err(GenerationError::Timeout(Duration::ZERO));
        }
        let mut reply = String::new();
        for item in self.items(request)? {
            reply.push_str(&item?);
        }
        Ok(reply)
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, GenerationError> {
        self.remember(request);
        if matches!(self.script, Script::Stall) {
            return Ok(Box::pin(stream::pending::<Result<String, GenerationError>>()));
        }

        let items = self.items(request)?;
        let delay = self.chunk_delay;
        let chunks = stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(chunks))
    }
}
