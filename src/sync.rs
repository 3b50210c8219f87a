//! Profile sync.
//!
//! Downloads every profile listed in the Profiles section of the implementation
//! guide's index page: the rendered page (trimmed to its content) and the
//! JSON definition (without `snapshot` and `text`). Output goes through the
//! artifact store, so the corpus loader finds it in the profile JSON directory.

use crate::config::PipelineConfig;
use crate::fetch::{extract, DocumentFetcher, FetchError};
use crate::identity::Identity;
use crate::store::{ArtifactKind, ArtifactStore, StoreError};
use futures::stream::{self, StreamExt};
use regex_lite::Regex;
use reqwest::Url;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const PROFILES_MARKER: &str = r#"<h3 id="profiles">"#;
const EXTENSIONS_MARKER: &str = r#"<h3 id="extensions">"#;
const PROFILE_LINK_PREFIX: &str = "StructureDefinition-us-core-";
const PAGE_START_MARKER: &str = r#"<h2 id="root""#;
const PAGE_END_MARKER: &str = r#"<script type="text/javascript" src="assets/js/jquery.js"></script>"#;

/// Profiles downloaded at once.
const SYNC_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch profile index: {0}")]
    Index(#[from] FetchError),

    #[error("profile index {0} has no Profiles section")]
    MissingSection(String),

    #[error("invalid index URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

/// Per-profile result of a sync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Profiles downloaded by this sync.
    pub fetched: Vec<Identity>,
    /// Profiles already present on disk.
    pub skipped: Vec<Identity>,
    /// Profiles that could not be downloaded, with the reason.
    pub failures: Vec<(Identity, String)>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.fetched.len() + self.skipped.len() + self.failures.len()
    }
}

enum ProfileOutcome {
    Fetched,
    Skipped,
    Failed(String),
}

/// Downloads the profile corpus.
pub struct ProfileSync {
    store: Arc<ArtifactStore>,
    fetcher: Arc<dyn DocumentFetcher>,
    index_url: String,
}

impl ProfileSync {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<ArtifactStore>,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Self {
        Self {
            store,
            fetcher,
            index_url: config.profile_index_url.clone(),
        }
    }

    /// Fetch the index and download every listed profile.
    ///
    /// Only a failure to read the index is an error; individual profiles
    /// that fail are recorded in the report.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        info!(url = %self.index_url, "fetching profile index");
        let index = self.fetcher.fetch_raw(&self.index_url).await?;
        let links = profile_links(&index)
            .ok_or_else(|| SyncError::MissingSection(self.index_url.clone()))?;
        let base = Url::parse(&self.index_url).map_err(|e| SyncError::InvalidUrl {
            url: self.index_url.clone(),
            message: e.to_string(),
        })?;

        info!(count = links.len(), "found profile links");

        let outcomes: Vec<(Identity, ProfileOutcome)> = stream::iter(links)
            .map(|href| {
                let base = &base;
                async move {
                    let identity = profile_identity(&href);
                    let outcome = self.sync_profile(base, &href, &identity).await;
                    (identity, outcome)
                }
            })
            .buffered(SYNC_CONCURRENCY)
            .collect()
            .await;

        let mut report = SyncReport::default();
        for (identity, outcome) in outcomes {
            match outcome {
                ProfileOutcome::Fetched => report.fetched.push(identity),
                ProfileOutcome::Skipped => report.skipped.push(identity),
                ProfileOutcome::Failed(reason) => {
                    warn!(profile = %identity, %reason, "profile sync failed");
                    report.failures.push((identity, reason));
                }
            }
        }

        info!(
            fetched = report.fetched.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "profile sync complete"
        );
        Ok(report)
    }

    async fn sync_profile(&self, base: &Url, href: &str, identity: &Identity) -> ProfileOutcome {
        let (json_path, html_path) = match (
            self.store.path_for(ArtifactKind::ProfileDefinition, identity, None),
            self.store.path_for(ArtifactKind::ProfileDocument, identity, None),
        ) {
            (Ok(json), Ok(html)) => (json, html),
            (Err(e), _) | (_, Err(e)) => return ProfileOutcome::Failed(e.to_string()),
        };

        let need_json = !self.store.exists(&json_path);
        let need_html = !self.store.exists(&html_path);
        if !need_json && !need_html {
            return ProfileOutcome::Skipped;
        }

        let html_url = match base.join(href) {
            Ok(u) => u,
            Err(e) => return ProfileOutcome::Failed(e.to_string()),
        };
        let json_url = match base.join(&json_href(href)) {
            Ok(u) => u,
            Err(e) => return ProfileOutcome::Failed(e.to_string()),
        };

        let html_task = async {
            if !need_html {
                return Ok::<(), String>(());
            }
            let page = self.fetcher.fetch_raw(html_url.as_str()).await.map_err(|e| e.to_string())?;
            self.write(&html_path, &clean_profile_page(&page))
        };
        let json_task = async {
            if !need_json {
                return Ok::<(), String>(());
            }
            let text = self.fetcher.fetch_raw(json_url.as_str()).await.map_err(|e| e.to_string())?;
            let stripped = strip_profile_json(&text).map_err(|e| format!("invalid JSON: {}", e))?;
            self.write(&json_path, &stripped)
        };

        let errors: Vec<String> = match futures::join!(html_task, json_task) {
            (Ok(()), Ok(())) => return ProfileOutcome::Fetched,
            (html, json) => [html.err(), json.err()].into_iter().flatten().collect(),
        };
        ProfileOutcome::Failed(errors.join("; "))
    }

    fn write(&self, path: &std::path::Path, content: &str) -> Result<(), String> {
        self.store
            .write(path, content)
            .map_err(|e: StoreError| e.to_string())
    }
}

/// Profile page links inside the Profiles section of the index, sorted.
///
/// Returns `None` when the section markers are missing.
pub fn profile_links(index_html: &str) -> Option<Vec<String>> {
    let start = index_html.find(PROFILES_MARKER)? + PROFILES_MARKER.len();
    let end = start + index_html[start..].find(EXTENSIONS_MARKER)?;
    let section = &index_html[start..end];

    let href = Regex::new(r#"(?i)<a\b[^>]*\bhref\s*=\s*["']([^"']+)["']"#).ok()?;
    let links: BTreeSet<String> = href
        .captures_iter(section)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|h| h.starts_with(PROFILE_LINK_PREFIX) && h.ends_with(".html"))
        .collect();
    Some(links.into_iter().collect())
}

fn profile_identity(href: &str) -> Identity {
    let stem = href.strip_suffix(".html").unwrap_or(href);
    Identity::new(stem.strip_prefix("StructureDefinition-").unwrap_or(stem))
}

fn json_href(href: &str) -> String {
    match href.strip_suffix(".html") {
        Some(stem) => format!("{}.json", stem),
        None => format!("{}.json", href),
    }
}

/// Reduce a rendered profile page to its content region.
///
/// The page is trimmed to run from the root heading through the trailing
/// script include, then the tabbed element views are replaced by the
/// key-elements view and inline styles are removed.
pub fn clean_profile_page(html: &str) -> String {
    let region = extract::trim_between(html, PAGE_START_MARKER, PAGE_END_MARKER);
    let cleaned = extract::clean_fragment(region, "tabs", "tabs-key");
    if !cleaned.swapped {
        warn!("no div#tabs-key inside div#tabs, keeping tabbed views");
    }
    cleaned.html
}

/// Drop `snapshot` and `text` from a profile definition and pretty-print it.
pub fn strip_profile_json(text: &str) -> Result<String, serde_json::Error> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("snapshot");
        obj.remove("text");
    }
    serde_json::to_string_pretty(&value)
}
