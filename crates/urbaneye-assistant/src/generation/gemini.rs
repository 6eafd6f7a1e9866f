//! Gemini provider.
//!
//! Calls `generateContent` for complete replies and `streamGenerateContent`
//! with `alt=sse` for streamed replies. SSE events are decoded from raw bytes
//! so multi-byte characters split across network reads survive intact.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use urbaneye_core::config::AssistantConfig;

use super::{GenerationError, GenerationProvider, GenerationRequest, TextStream};
use crate::types::Role;

/// Gemini API base URL.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Bound on establishing the connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Gemini provider configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Deadline for a complete `generateContent` call. Streamed replies are
    /// only bounded per read, so a long reply that keeps arriving is never cut.
    pub request_timeout: Duration,
}

impl GeminiConfig {
    /// Build from the assistant section, resolving the key from the environment
    /// when it is not set explicitly.
    pub fn from_assistant_config(config: &AssistantConfig) -> Self {
        Self {
            api_key: config.resolve_api_key(),
            model: config.model.clone(),
            base_url: GEMINI_API_BASE.to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Gemini text provider.
pub struct GeminiProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerationError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            method
        )
    }

    fn ensure_configured(&self) -> Result<(), GenerationError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(GenerationError::NotConfigured(
                "Gemini API key not set (configure assistant.api_key or GEMINI_API_KEY)"
                    .to_string(),
            ))
        }
    }

    async fn post(
        &self,
        url: &str,
        body: &GenerateContentRequest,
        deadline: Option<Duration>,
    ) -> Result<reqwest::Response, GenerationError> {
        let mut builder = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body);
        if let Some(deadline) = deadline {
            builder = builder.timeout(deadline);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited);
        }
        Err(GenerationError::Api(format!(
            "Gemini API error {}: {}",
            status, error_text
        )))
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.ensure_configured()?;
        let body = GenerateContentRequest::from_request(request);

        tracing::debug!(
            model = %self.config.model,
            history_len = request.history.len(),
            "Sending request to Gemini API"
        );

        let response = self
            .post(
                &self.api_url("generateContent"),
                &body,
                Some(self.config.request_timeout),
            )
            .await?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Api(format!("failed to parse response: {}", e)))?;

        Ok(parsed.into_text()?.unwrap_or_default())
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, GenerationError> {
        self.ensure_configured()?;
        let body = GenerateContentRequest::from_request(request);
        let url = format!("{}?alt=sse", self.api_url("streamGenerateContent"));

        tracing::debug!(
            model = %self.config.model,
            history_len = request.history.len(),
            "Starting streaming request to Gemini API"
        );

        let response = self.post(&url, &body, None).await?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(GenerationError::Network(e.to_string()))).await;
                        return;
                    }
                };

                for payload in decoder.push(&chunk) {
                    match parse_stream_payload(&payload) {
                        Ok(Some(text)) => {
                            if tx.send(Ok(text)).await.is_err() {
                                // Receiver dropped; nobody is listening anymore.
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

/// Incremental decoder for `text/event-stream` bodies.
///
/// Accepts `\n\n` and `\r\n\r\n` event separators and yields the joined
/// `data:` payload of every complete event.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(event) = self.next_event() {
            let event = String::from_utf8_lossy(&event);
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
                .collect();
            if !data.is_empty() {
                payloads.push(data.join("\n"));
            }
        }
        payloads
    }

    fn next_event(&mut self) -> Option<Vec<u8>> {
        let lf = find(&self.buffer, b"\n\n").map(|pos| (pos, 2));
        let crlf = find(&self.buffer, b"\r\n\r\n").map(|pos| (pos, 4));
        let (pos, separator_len) = match (lf, crlf) {
            (Some(a), Some(b)) => {
                if a.0 <= b.0 {
                    a
                } else {
                    b
                }
            }
            (a, b) => a.or(b)?,
        };
        let mut event: Vec<u8> = self.buffer.drain(..pos + separator_len).collect();
        event.truncate(pos);
        Some(event)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Extract the text carried by one streamed response payload.
fn parse_stream_payload(payload: &str) -> Result<Option<String>, GenerationError> {
    let response: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|e| GenerationError::Api(format!("malformed stream event: {}", e)))?;
    response.into_text()
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    fn from_request(request: &GenerationRequest) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: request.system_instruction.clone(),
                }],
            },
            contents: request
                .history
                .iter()
                .map(|turn| Content {
                    role: Some(gemini_role(turn.role).to_string()),
                    parts: vec![Part {
                        text: turn.text.clone(),
                    }],
                })
                .collect(),
            generation_config: GenerationConfig {
                max_output_tokens: request.params.max_output_tokens,
                temperature: request.params.temperature,
                top_p: request.params.top_p,
            },
        }
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, or `None` for events that
    /// carry no text (e.g. a trailing usage-only event).
    fn into_text(self) -> Result<Option<String>, GenerationError> {
        if let Some(error) = self.error {
            return Err(GenerationError::Api(format!(
                "Gemini API error {}: {}",
                error.code, error.message
            )));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(None);
        };
        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(GenerationError::ContentFiltered);
        }

        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        Ok(if text.is_empty() { None } else { Some(text) })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationParams, HistoryTurn};

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_instruction: "be brief".to_string(),
            history: vec![
                HistoryTurn {
                    role: Role::User,
                    text: "hi".to_string(),
                },
                HistoryTurn {
                    role: Role::Assistant,
                    text: "hello".to_string(),
                },
                HistoryTurn {
                    role: Role::User,
                    text: "status?".to_string(),
                },
            ],
            params: GenerationParams::default(),
        }
    }

    fn unconfigured() -> GeminiProvider {
        GeminiProvider::new(GeminiConfig {
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            base_url: GEMINI_API_BASE.to_string(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(GenerateContentRequest::from_request(&request())).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "status?");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 300);
        assert!(body["generationConfig"]["topP"].as_f64().unwrap() > 0.89);
    }

    #[test]
    fn test_api_url() {
        let provider = unconfigured();
        assert_eq!(
            provider.api_url("streamGenerateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent"
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let provider = unconfigured();
        assert!(!provider.is_configured());
        let err = provider.generate_stream(&request()).await.err().unwrap();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
    }

    // ---- SSE decoding ----

    /// Read one HTTP request (headers plus `content-length` body) off `socket`.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        use tokio::io::AsyncReadExt;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = find(&buf, b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_stream_longer_than_request_timeout_is_not_cut() {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await
                .unwrap();
            for word in ["one", " two", " three", " four"] {
                tokio::time::sleep(Duration::from_millis(150)).await;
                let event = format!(
                    "data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":\"{}\"}}]}}}}]}}\n\n",
                    word
                );
                socket.write_all(event.as_bytes()).await.unwrap();
            }
            socket.shutdown().await.unwrap();
        });

        let provider = GeminiProvider::new(GeminiConfig {
            api_key: "test-key".to_string(),
            model: "gemini-2.5-flash".to_string(),
            base_url: format!("http://{}", addr),
            request_timeout: Duration::from_millis(400),
        })
        .unwrap();

        let stream = provider.generate_stream(&request()).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        let text: String = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(text, "one two three four");
    }

    #[test]
    fn test_sse_decoder_single_event() {
        let mut decoder = SseDecoder::default();
        let payloads = decoder.push(b"data: {\"a\":1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_sse_decoder_crlf_and_split_reads() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: one\r").is_empty());
        assert!(decoder.push(b"\n\r").is_empty());
        let payloads = decoder.push(b"\ndata: two\r\n\r\n");
        assert_eq!(payloads, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_sse_decoder_multibyte_split_across_reads() {
        let event = "data: नमस्ते\n\n".as_bytes();
        let (first, second) = event.split_at(7); // inside the first Devanagari char
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(first).is_empty());
        assert_eq!(decoder.push(second), vec!["नमस्ते".to_string()]);
    }

    #[test]
    fn test_sse_decoder_ignores_comments_and_joins_data_lines() {
        let mut decoder = SseDecoder::default();
        let payloads = decoder.push(b": keep-alive\n\ndata:a\ndata: b\n\n");
        assert_eq!(payloads, vec!["a\nb".to_string()]);
    }

    // ---- Payload parsing ----

    #[test]
    fn test_parse_payload_text() {
        let payload = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi"},{"text":" there"}]}}]}"#;
        assert_eq!(parse_stream_payload(payload).unwrap(), Some("Hi there".to_string()));
    }

    #[test]
    fn test_parse_payload_without_text() {
        let payload = r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":9}}"#;
        assert_eq!(parse_stream_payload(payload).unwrap(), None);
    }

    #[test]
    fn test_parse_payload_safety() {
        let payload = r#"{"candidates":[{"content":{"parts":[]},"finishReason":"SAFETY"}]}"#;
        assert_eq!(
            parse_stream_payload(payload).unwrap_err(),
            GenerationError::ContentFiltered
        );
    }

    #[test]
    fn test_parse_payload_error_body() {
        let payload = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        let err = parse_stream_payload(payload).unwrap_err();
        assert!(matches!(err, GenerationError::Api(ref m) if m.contains("API key not valid")));
    }

    #[test]
    fn test_parse_payload_malformed() {
        assert!(matches!(
            parse_stream_payload("not json"),
            Err(GenerationError::Api(_))
        ));
    }
}
