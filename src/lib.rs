//! fhir-compare: cached, dependency-driven FHIR comparison reports.
//!
//! Generates layered documentation comparing two FHIR versions and migration
//! reports for US Core profiles, using a text generation service.
//!
//! # Core Concepts
//!
//! - **Identity**: case-insensitive resource or profile name keying every artifact
//! - **Artifact Store**: the only owner of on-disk paths; atomic writes
//! - **Stages**: DocFetch → Summarize → Diff → MigrationAnalysis, each cached
//! - **Pipeline**: memoized (stage, identity) executor with failure isolation
//! - **Profile resolver**: ancestor walk and base type derivation
//!
//! # Example
//!
//! ```no_run
//! use fhir_compare::{
//!     HttpFetcher, Identity, MockGenerator, Pipeline, PipelineConfig, ProfileCorpus,
//!     StageContext, StageKind,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let context = StageContext::new(
//!     Arc::new(PipelineConfig::new("out")),
//!     Arc::new(MockGenerator::default()),
//!     Arc::new(HttpFetcher::new()),
//!     Arc::new(ProfileCorpus::new()),
//! )?;
//! let pipeline = Pipeline::standard(context)?;
//! let _succeeded = pipeline.run_one(&Identity::new("Patient"), StageKind::Diff).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod fetch;
pub mod generate;
mod identity;
pub mod pipeline;
pub mod profile;
pub mod stage;
pub mod store;
pub mod sync;

pub use config::{ConfigError, GeminiConfig, PipelineConfig, SpecVersion};
pub use fetch::{DocumentFetcher, FetchError, HttpFetcher, MockFetcher, Segment};
pub use generate::{
    GeminiClient, GenerationError, MockGenerator, PromptPart, TextGenerator, TextStream,
    UnavailableGenerator,
};
pub use identity::Identity;
pub use pipeline::{
    Comparison, ComparisonReport, Outcome, Pipeline, PipelineError, RunError, RunSummary,
    StageCounters,
};
pub use profile::{BaseType, CorpusError, ProfileCorpus, ProfileNode, ProfileResolver, ProfileTree};
pub use stage::{Stage, StageContext, StageError, StageKind, StageOutput, Templates};
pub use store::{Artifact, ArtifactKind, ArtifactStore, StoreError};
pub use sync::{ProfileSync, SyncError, SyncReport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
