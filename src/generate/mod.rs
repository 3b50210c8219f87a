//! Text generation service client.
//!
//! Defines the generation trait the stages call and two implementations:
//! - `GeminiClient`: streams from the Gemini REST API (production)
//! - `MockGenerator`: returns preconfigured text and records prompts (testing)
//!
//! Stages only see [`TextGenerator`]; they never depend on how the service is
//! reached.

mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One ordered piece of a prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    /// Binary payload sent inline with its MIME type.
    Inline { mime_type: String, data: Vec<u8> },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        PromptPart::Text(text.into())
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        PromptPart::Inline {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Text view of the part (inline payloads decoded lossily).
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        match self {
            PromptPart::Text(t) => std::borrow::Cow::Borrowed(t),
            PromptPart::Inline { data, .. } => String::from_utf8_lossy(data),
        }
    }
}

/// Errors from the generation service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generation service not available: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response parse error: {0}")]
    Parse(String),
}

/// Lazy, finite, non-restartable sequence of generated text fragments.
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

/// Client trait for the text generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start generating from an ordered list of prompt parts.
    ///
    /// Errors before the first chunk are returned directly; errors during
    /// streaming arrive as stream items.
    async fn generate(&self, parts: Vec<PromptPart>) -> Result<TextStream, GenerationError>;
}

/// Mock generator for testing: returns preconfigured text.
///
/// Every call is recorded. A call fails when any prompt part contains one of
/// the registered failure markers.
pub struct MockGenerator {
    response: String,
    chunk_size: usize,
    fail_markers: Vec<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<PromptPart>>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::with_response("generated")
    }
}

impl MockGenerator {
    /// Create a mock that answers every prompt with `response`.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            chunk_size: 8,
            fail_markers: Vec::new(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Fail any prompt containing `marker`.
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_markers.push(marker.into());
        self
    }

    /// Fail every prompt.
    pub fn always_failing() -> Self {
        Self::default().failing_on("")
    }

    /// Number of `generate` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<Vec<PromptPart>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, parts: Vec<PromptPart>) -> Result<TextStream, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_markers
            .iter()
            .any(|m| parts.iter().any(|p| p.as_text().contains(m.as_str())));
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(parts);
        }

        if failing {
            return Err(GenerationError::Unavailable(
                "mock generator configured to fail".to_string(),
            ));
        }

        let chunks: Vec<Result<String, GenerationError>> = self
            .response
            .as_bytes()
            .chunks(self.chunk_size.max(1))
            .map(|c| Ok(String::from_utf8_lossy(c).into_owned()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Generator for runs that must not generate (e.g. fetch-only commands).
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableGenerator;

#[async_trait]
impl TextGenerator for UnavailableGenerator {
    async fn generate(&self, _parts: Vec<PromptPart>) -> Result<TextStream, GenerationError> {
        Err(GenerationError::Unavailable(
            "no generation service configured".to_string(),
        ))
    }
}

/// Collect a stream into one string (used by tests and diagnostics).
pub async fn collect_text(mut stream: TextStream) -> Result<String, GenerationError> {
    use futures::StreamExt;

    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        out.push_str(&chunk?);
    }
    Ok(out)
}
