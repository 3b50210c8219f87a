//! Gemini streaming client.
//!
//! Calls `models/{model}:streamGenerateContent?alt=sse` and turns the
//! server-sent events into a stream of text fragments.

use super::{GenerationError, PromptPart, TextGenerator, TextStream};
use crate::config::GeminiConfig;
use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::debug;

/// Production [`TextGenerator`] backed by the Gemini REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

/// Build the JSON request body for a prompt.
fn request_body(parts: &[PromptPart]) -> Value {
    let parts: Vec<Value> = parts
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => json!({ "text": text }),
            PromptPart::Inline { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": BASE64_STANDARD.encode(data),
                }
            }),
        })
        .collect();

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": { "responseMimeType": "text/plain" },
    })
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, parts: Vec<PromptPart>) -> Result<TextStream, GenerationError> {
        debug!(model = %self.config.model, parts = parts.len(), "starting generation");

        let response = self
            .http
            .post(self.stream_url())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request_body(&parts))
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(sse_text_stream(response.bytes_stream()).boxed())
    }
}

/// Parser state for a server-sent event byte stream.
struct SseState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl<S> SseState<S> {
    /// Consume every complete line in the buffer.
    fn drain_lines(&mut self) -> Result<(), GenerationError> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload.is_empty() || payload == "[DONE]" {
                continue;
            }

            let text = chunk_text(payload)?;
            if !text.is_empty() {
                self.pending.push_back(text);
            }
        }
        Ok(())
    }
}

/// Extract the text of one streamed `GenerateContentResponse`.
fn chunk_text(payload: &str) -> Result<String, GenerationError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| GenerationError::Parse(e.to_string()))?;

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(GenerationError::Request(message.to_string()));
    }

    let text = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();
    Ok(text)
}

fn sse_text_stream<S, B, E>(inner: S) -> impl Stream<Item = Result<String, GenerationError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let state = SseState {
        inner: Box::pin(inner),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(text) = state.pending.pop_front() {
                return Some((Ok(text), state));
            }
            if state.done {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(bytes.as_ref());
                    if let Err(e) = state.drain_lines() {
                        state.done = true;
                        state.pending.clear();
                        return Some((Err(e), state));
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(GenerationError::Request(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    state.buffer.push(b'\n');
                    if let Err(e) = state.drain_lines() {
                        state.pending.clear();
                        return Some((Err(e), state));
                    }
                }
            }
        }
    })
}
