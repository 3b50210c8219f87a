//! Pipeline execution.
//!
//! - `executor`: memoized (stage, identity) task graph
//! - `orchestrator`: `run_all` / `run_one` with per-identity isolation
//! - `comparison`: the full sync, diff, migrate run

mod comparison;
mod executor;
mod orchestrator;

pub use comparison::{Comparison, ComparisonReport, RunError};
pub use executor::{Pipeline, PipelineBuilder, StageCounters};
pub use orchestrator::{IdentityOutcome, Outcome, RunSummary};

use crate::stage::StageKind;
use thiserror::Error;

/// Invalid stage graph.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage {stage} depends on unregistered stage {upstream}")]
    UnknownUpstream { stage: StageKind, upstream: StageKind },

    #[error("stage graph has a cycle through {0}")]
    Cycle(StageKind),
}
