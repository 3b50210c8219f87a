//! Artifact addressing types.

use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// What kind of file an artifact is.
///
/// The four stage outputs plus the two downloaded profile sources that feed
/// the migration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Fetched HTML documentation, one per version.
    Document,
    /// Structured summary, one per version.
    Summary,
    /// Cross-version difference analysis.
    Diff,
    /// Per-profile migration report.
    Migration,
    /// Downloaded profile definition (JSON).
    ProfileDefinition,
    /// Downloaded profile documentation (HTML).
    ProfileDocument,
}

impl ArtifactKind {
    /// Whether paths of this kind include a version variant.
    pub fn is_versioned(&self) -> bool {
        matches!(self, ArtifactKind::Document | ArtifactKind::Summary)
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactKind::Document => "document",
            ArtifactKind::Summary => "summary",
            ArtifactKind::Diff => "diff",
            ArtifactKind::Migration => "migration",
            ArtifactKind::ProfileDefinition => "profile_definition",
            ArtifactKind::ProfileDocument => "profile_document",
        };
        write!(f, "{}", s)
    }
}

/// A single persisted file: (kind, identity, variant) plus its resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub identity: Identity,
    /// Version label for versioned kinds.
    pub variant: Option<String>,
    pub path: PathBuf,
}

impl Artifact {
    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }
}

/// Errors from artifact store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} artifacts require a version variant")]
    MissingVariant { kind: ArtifactKind },

    #[error("'{identity}' cannot be used in an artifact path")]
    InvalidIdentity { identity: Identity },

    #[error("write to {path} interrupted: {message}")]
    Interrupted { path: PathBuf, message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
