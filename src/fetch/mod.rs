//! Source document fetching.
//!
//! [`DocumentFetcher`] is the single seam to the network. `HttpFetcher` is the
//! production implementation; `MockFetcher` serves scripted pages in tests.

pub mod extract;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Id of the element holding the body of a FHIR documentation page.
pub const SEGMENT_ID: &str = "segment-content";

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// Result of a best-effort segment fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Extracted markup.
    Content(String),
    /// Inline marker explaining why no content is available.
    Placeholder(String),
}

impl Segment {
    fn placeholder(message: impl std::fmt::Display) -> Self {
        Segment::Placeholder(format!("<p>{}</p>", message))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Segment::Placeholder(_))
    }

    pub fn as_markup(&self) -> &str {
        match self {
            Segment::Content(m) | Segment::Placeholder(m) => m,
        }
    }

    pub fn into_markup(self) -> String {
        match self {
            Segment::Content(m) | Segment::Placeholder(m) => m,
        }
    }
}

/// Client trait for the document fetch capability.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch a document body as text.
    async fn fetch_raw(&self, url: &str) -> Result<String, FetchError>;

    /// Fetch a page and extract its `#segment-content` element.
    ///
    /// Never fails: any problem becomes a [`Segment::Placeholder`].
    async fn fetch_segment(&self, url: &str) -> Segment {
        let body = match self.fetch_raw(url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url, error = %e, "fetch failed");
                return Segment::placeholder(format!("Error fetching {}: {}", url, e));
            }
        };

        match extract::inner_html_by_id(&body, SEGMENT_ID) {
            Some(inner) => Segment::Content(inner),
            None => {
                warn!(url, "no #{} element in page", SEGMENT_ID);
                Segment::placeholder(format!("Could not find #{} in {}", SEGMENT_ID, url))
            }
        }
    }
}

/// Production fetcher over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch_raw(&self, url: &str) -> Result<String, FetchError> {
        debug!(url, "fetching");
        let request_error = |e: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.http.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(request_error)
    }
}

/// Scripted fetcher for tests.
///
/// Serves registered pages by exact URL, falls back to a default body when
/// one is set, and fails any URL containing a registered marker.
#[derive(Default)]
pub struct MockFetcher {
    pages: HashMap<String, String>,
    fallback: Option<String>,
    fail_markers: Vec<String>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`.
    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    /// Serve `body` for every URL without a registered page.
    pub fn with_fallback(mut self, body: impl Into<String>) -> Self {
        self.fallback = Some(body.into());
        self
    }

    /// Answer 503 for any URL containing `marker`.
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_markers.push(marker.into());
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DocumentFetcher for MockFetcher {
    async fn fetch_raw(&self, url: &str) -> Result<String, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }

        if self.fail_markers.iter().any(|m| url.contains(m.as_str())) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }

        self.pages
            .get(url)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}
