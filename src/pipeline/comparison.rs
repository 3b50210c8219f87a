//! Full comparison run.
//!
//! Syncs the profile corpus, produces the difference analysis of every
//! configured resource, then a migration report for every profile.

use super::executor::Pipeline;
use super::orchestrator::RunSummary;
use super::PipelineError;
use crate::config::{ConfigError, PipelineConfig};
use crate::fetch::DocumentFetcher;
use crate::generate::TextGenerator;
use crate::identity::Identity;
use crate::profile::{CorpusError, ProfileCorpus};
use crate::stage::{StageContext, StageKind};
use crate::store::ArtifactStore;
use crate::sync::{ProfileSync, SyncReport};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Conditions that stop a run before any per-identity work.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    /// `None` when the profile index could not be read.
    pub sync: Option<SyncReport>,
    pub diff: RunSummary,
    /// `None` when no difference analysis succeeded.
    pub migration: Option<RunSummary>,
}

impl ComparisonReport {
    pub fn is_success(&self) -> bool {
        self.sync.as_ref().map(SyncReport::is_success).unwrap_or(false)
            && self.diff.is_success()
            && self.migration.as_ref().map(RunSummary::is_success).unwrap_or(false)
    }
}

/// Collaborators and configuration for a full run.
pub struct Comparison {
    config: Arc<PipelineConfig>,
    generator: Arc<dyn TextGenerator>,
    fetcher: Arc<dyn DocumentFetcher>,
}

impl Comparison {
    pub fn new(
        config: Arc<PipelineConfig>,
        generator: Arc<dyn TextGenerator>,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Self {
        Self {
            config,
            generator,
            fetcher,
        }
    }

    /// Sync profiles, then diff every resource, then migrate every profile.
    ///
    /// A failed sync is logged and the run continues with whatever profiles
    /// are already on disk. The migration phase runs only when at least one
    /// difference analysis succeeded.
    pub async fn run(&self) -> Result<ComparisonReport, RunError> {
        let store = Arc::new(ArtifactStore::new(&self.config));

        info!("syncing profiles");
        let sync = match ProfileSync::new(&self.config, store.clone(), self.fetcher.clone())
            .run()
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "profile sync failed");
                None
            }
        };

        let corpus = Arc::new(ProfileCorpus::load_dir(&store.profile_json_dir())?);
        let context = StageContext::new(
            self.config.clone(),
            self.generator.clone(),
            self.fetcher.clone(),
            corpus.clone(),
        )?;
        let pipeline = Pipeline::standard(context)?;

        let resources: Vec<Identity> = self
            .config
            .resource_names
            .iter()
            .map(|name| Identity::new(name.as_str()))
            .collect();
        info!(count = resources.len(), "analyzing resource differences");
        let diff = pipeline.run_all(&resources, StageKind::Diff).await;

        let migration = if diff.successes() > 0 {
            info!(count = corpus.len(), "analyzing profile migrations");
            Some(
                pipeline
                    .run_all(&corpus.identities(), StageKind::MigrationAnalysis)
                    .await,
            )
        } else {
            warn!("no difference analysis succeeded, skipping migration analysis");
            None
        };

        Ok(ComparisonReport {
            sync,
            diff,
            migration,
        })
    }
}
