//! Batch runs over many identities.
//!
//! One identity's failure never stops the others. Identities fan out up to
//! the configured concurrency; work for a single identity stays sequential.

use super::executor::{Pipeline, StageCounters};
use crate::identity::Identity;
use crate::stage::{StageError, StageKind, StageOutput};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info};
use uuid::Uuid;

/// How one identity fared.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded {
        cache_hit: bool,
        artifacts: Vec<PathBuf>,
    },
    Failed {
        kind: &'static str,
        error: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded { .. })
    }
}

impl From<&Result<StageOutput, StageError>> for Outcome {
    fn from(result: &Result<StageOutput, StageError>) -> Self {
        match result {
            Ok(out) => Outcome::Succeeded {
                cache_hit: out.cache_hit,
                artifacts: out.artifacts.iter().map(|a| a.path.clone()).collect(),
            },
            Err(e) => Outcome::Failed {
                kind: e.tag(),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityOutcome {
    pub identity: Identity,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Result of [`Pipeline::run_all`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub stage: StageKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per requested identity, in request order.
    pub outcomes: Vec<IdentityOutcome>,
    /// Counters for every stage touched so far by the pipeline.
    pub stage_counters: BTreeMap<StageKind, StageCounters>,
}

impl RunSummary {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    /// Identities that failed, with their outcome.
    pub fn failed(&self) -> impl Iterator<Item = &IdentityOutcome> {
        self.outcomes.iter().filter(|o| !o.outcome.is_success())
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl Pipeline {
    /// Ensure `stage` for every identity, recording each outcome.
    pub async fn run_all(&self, identities: &[Identity], stage: StageKind) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let concurrency = self.context().config.concurrency.max(1);
        let total = identities.len();
        info!(%run_id, %stage, total, concurrency, "starting run");

        let outcomes: Vec<IdentityOutcome> = stream::iter(identities.iter().enumerate())
            .map(|(index, identity)| async move {
                info!(%stage, %identity, "[{}/{}] processing", index + 1, total);
                let result = self.ensure(stage, identity).await;
                match &result {
                    Ok(out) if out.cache_hit => info!(%stage, %identity, "already complete"),
                    Ok(_) => info!(%stage, %identity, "completed"),
                    Err(e) => error!(%stage, %identity, error = %e, "failed"),
                }
                IdentityOutcome {
                    identity: identity.clone(),
                    outcome: Outcome::from(&result),
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let summary = RunSummary {
            run_id,
            stage,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            stage_counters: self.counters(),
        };
        info!(
            %run_id,
            %stage,
            succeeded = summary.successes(),
            failed = summary.failures(),
            "run complete"
        );
        summary
    }

    /// Ensure `stage` for one identity; true on success.
    pub async fn run_one(&self, identity: &Identity, stage: StageKind) -> bool {
        match self.ensure(stage, identity).await {
            Ok(_) => {
                info!(%stage, %identity, "completed");
                true
            }
            Err(e) => {
                error!(%stage, %identity, error = %e, "failed");
                false
            }
        }
    }
}
