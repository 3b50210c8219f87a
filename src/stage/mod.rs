//! Artifact-producing stages.
//!
//! A stage names the artifacts it produces for an identity, the stages it
//! depends on, and how to produce the artifacts once its inputs are ready.
//! The cache check, dependency resolution and error boundary live in the
//! pipeline executor, so every stage gets them the same way.

mod diff;
mod doc_fetch;
mod migration;
mod prompts;
mod summarize;

pub use diff::DiffStage;
pub use doc_fetch::{compose_page, DocFetchStage};
pub use migration::MigrationStage;
pub use prompts::Templates;
pub use summarize::SummarizeStage;

use crate::config::{ConfigError, PipelineConfig};
use crate::fetch::{DocumentFetcher, FetchError};
use crate::generate::{GenerationError, PromptPart, TextGenerator};
use crate::identity::Identity;
use crate::profile::{ProfileCorpus, ProfileResolver};
use crate::store::{Artifact, ArtifactStore, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// The four stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    DocFetch,
    Summarize,
    Diff,
    MigrationAnalysis,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::DocFetch,
        StageKind::Summarize,
        StageKind::Diff,
        StageKind::MigrationAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::DocFetch => "doc_fetch",
            StageKind::Summarize => "summarize",
            StageKind::Diff => "diff",
            StageKind::MigrationAnalysis => "migration_analysis",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tagged stage failure.
///
/// Cloneable because a memoized outcome may be handed to several dependents.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("dependency {stage} for {identity} failed: {reason}")]
    DependencyUnresolved {
        stage: StageKind,
        identity: Identity,
        reason: String,
    },

    #[error("service error: {0}")]
    Service(String),

    #[error("IO error at {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl StageError {
    /// Short tag for reports.
    pub fn tag(&self) -> &'static str {
        match self {
            StageError::NotFound(_) => "not_found",
            StageError::DependencyUnresolved { .. } => "dependency_unresolved",
            StageError::Service(_) => "service_error",
            StageError::Io { .. } => "io_error",
        }
    }
}

impl From<StoreError> for StageError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io { path, source } => StageError::Io {
                path,
                message: source.to_string(),
            },
            // the generation stream broke mid-write
            StoreError::Interrupted { message, .. } => StageError::Service(message),
            other @ StoreError::InvalidIdentity { .. } => StageError::NotFound(other.to_string()),
            other @ StoreError::MissingVariant { .. } => StageError::Io {
                path: PathBuf::new(),
                message: other.to_string(),
            },
        }
    }
}

impl From<GenerationError> for StageError {
    fn from(e: GenerationError) -> Self {
        StageError::Service(e.to_string())
    }
}

impl From<FetchError> for StageError {
    fn from(e: FetchError) -> Self {
        StageError::Service(e.to_string())
    }
}

/// One (stage, identity) a stage needs before it can generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub stage: StageKind,
    pub identity: Identity,
    /// A failed required dependency blocks generation; a failed optional one
    /// is handed to the stage as absent.
    pub required: bool,
}

impl Dependency {
    pub fn required(stage: StageKind, identity: Identity) -> Self {
        Self {
            stage,
            identity,
            required: true,
        }
    }

    pub fn optional(stage: StageKind, identity: Identity) -> Self {
        Self {
            stage,
            identity,
            required: false,
        }
    }
}

/// Successful result of ensuring a stage for an identity.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: StageKind,
    pub identity: Identity,
    pub artifacts: Vec<Artifact>,
    /// True when every artifact already existed and nothing ran.
    pub cache_hit: bool,
}

impl StageOutput {
    /// The artifact for a version variant (or the unversioned one).
    pub fn artifact(&self, variant: Option<&str>) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.variant() == variant)
    }
}

/// Resolved dependency outcomes, in declaration order.
#[derive(Debug, Default)]
pub struct StageInputs {
    entries: Vec<(Dependency, Result<StageOutput, StageError>)>,
}

impl StageInputs {
    pub fn push(&mut self, dependency: Dependency, outcome: Result<StageOutput, StageError>) {
        self.entries.push((dependency, outcome));
    }

    /// Output of a dependency, if it succeeded.
    pub fn get(&self, stage: StageKind, identity: &Identity) -> Option<&StageOutput> {
        self.entries
            .iter()
            .find(|(d, _)| d.stage == stage && &d.identity == identity)
            .and_then(|(_, outcome)| outcome.as_ref().ok())
    }

    /// Failure of a dependency, if it failed.
    pub fn failure(&self, stage: StageKind, identity: &Identity) -> Option<&StageError> {
        self.entries
            .iter()
            .find(|(d, _)| d.stage == stage && &d.identity == identity)
            .and_then(|(_, outcome)| outcome.as_ref().err())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared, read-only collaborators for every stage in a run.
pub struct StageContext {
    pub config: Arc<PipelineConfig>,
    pub store: Arc<ArtifactStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub corpus: Arc<ProfileCorpus>,
    pub resolver: ProfileResolver,
    pub templates: Templates,
}

impl StageContext {
    /// Build a context, loading prompt templates from the configured directory.
    pub fn new(
        config: Arc<PipelineConfig>,
        generator: Arc<dyn TextGenerator>,
        fetcher: Arc<dyn DocumentFetcher>,
        corpus: Arc<ProfileCorpus>,
    ) -> Result<Self, ConfigError> {
        let templates = Templates::load(config.templates_dir.as_deref())?;
        Ok(Self {
            store: Arc::new(ArtifactStore::new(&config)),
            resolver: ProfileResolver::from_config(&config),
            config,
            generator,
            fetcher,
            corpus,
            templates,
        })
    }

    /// Generate from `parts` and stream the result into `artifact`.
    pub(crate) async fn generate_into(
        &self,
        artifact: &Artifact,
        parts: Vec<PromptPart>,
    ) -> Result<(), StageError> {
        let stream = self.generator.generate(parts).await?;
        let bytes = self.store.write_stream(&artifact.path, stream).await?;
        info!(
            identity = %artifact.identity,
            kind = %artifact.kind,
            path = %artifact.path.display(),
            bytes,
            "artifact written"
        );
        Ok(())
    }
}

/// One artifact-producing unit of work.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Stage kinds this stage may depend on.
    fn upstream(&self) -> &'static [StageKind];

    /// Every artifact this stage produces for `identity`.
    fn targets(&self, identity: &Identity, ctx: &StageContext) -> Result<Vec<Artifact>, StageError>;

    /// Dependencies to ensure before generating.
    ///
    /// Defaults to every upstream stage for the same identity, all required.
    fn dependencies(
        &self,
        identity: &Identity,
        _ctx: &StageContext,
    ) -> Result<Vec<Dependency>, StageError> {
        Ok(self
            .upstream()
            .iter()
            .map(|&stage| Dependency::required(stage, identity.clone()))
            .collect())
    }

    /// Produce the `missing` targets.
    ///
    /// Only called when at least one target is missing and every required
    /// dependency succeeded.
    async fn generate(
        &self,
        identity: &Identity,
        missing: &[Artifact],
        inputs: &StageInputs,
        ctx: &StageContext,
    ) -> Result<(), StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn store_errors_map_to_tags() {
        let io_err: StageError = StoreError::Io {
            path: PathBuf::from("/x"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert_eq!(io_err.tag(), "io_error");

        let broken: StageError = StoreError::Interrupted {
            path: PathBuf::from("/x"),
            message: "stream reset".into(),
        }
        .into();
        assert!(matches!(broken, StageError::Service(m) if m == "stream reset"));
    }

    #[test]
    fn inputs_distinguish_success_and_failure() {
        let mut inputs = StageInputs::default();
        let id = Identity::new("Observation");
        inputs.push(
            Dependency::optional(StageKind::Diff, id.clone()),
            Err(StageError::Service("down".into())),
        );

        assert!(inputs.get(StageKind::Diff, &id).is_none());
        assert!(inputs.failure(StageKind::Diff, &Identity::new("observation")).is_some());
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn stage_kinds_are_ordered() {
        let mut kinds = StageKind::ALL.to_vec();
        kinds.reverse();
        kinds.sort();
        assert_eq!(kinds, StageKind::ALL.to_vec());
        assert_eq!(StageKind::MigrationAnalysis.to_string(), "migration_analysis");
    }
}
