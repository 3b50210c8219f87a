//! Memoized stage executor.
//!
//! `ensure(stage, identity)` runs the shared stage algorithm: cache check,
//! dependency resolution, generation. Each (stage, identity) task runs at most
//! once per pipeline; concurrent callers for the same key wait on the first.

use super::PipelineError;
use crate::identity::Identity;
use crate::stage::{
    DiffStage, DocFetchStage, MigrationStage, Stage, StageContext, StageError, StageInputs,
    StageKind, StageOutput, SummarizeStage,
};
use crate::store::Artifact;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

type TaskKey = (StageKind, Identity);
type TaskOutcome = Result<StageOutput, StageError>;

/// Per-stage outcome counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounters {
    pub succeeded: usize,
    pub cache_hits: usize,
    pub failed: usize,
}

/// Builds a [`Pipeline`], validating the stage graph.
pub struct PipelineBuilder {
    context: StageContext,
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn new(context: StageContext) -> Self {
        Self {
            context,
            stages: Vec::new(),
        }
    }

    /// Register a stage; a later registration of the same kind replaces it.
    pub fn stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Register the four standard stages.
    pub fn standard_stages(self) -> Self {
        self.stage(DocFetchStage)
            .stage(SummarizeStage)
            .stage(DiffStage)
            .stage(MigrationStage)
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let mut stages: HashMap<StageKind, Arc<dyn Stage>> = HashMap::new();
        for stage in self.stages {
            stages.insert(stage.kind(), stage);
        }
        validate_graph(&stages)?;

        Ok(Pipeline {
            context: Arc::new(self.context),
            stages,
            memo: DashMap::new(),
            counters: DashMap::new(),
        })
    }
}

/// Every upstream kind must be registered and the graph must be acyclic.
fn validate_graph(stages: &HashMap<StageKind, Arc<dyn Stage>>) -> Result<(), PipelineError> {
    for stage in stages.values() {
        for upstream in stage.upstream() {
            if !stages.contains_key(upstream) {
                return Err(PipelineError::UnknownUpstream {
                    stage: stage.kind(),
                    upstream: *upstream,
                });
            }
        }
    }

    fn visit(
        kind: StageKind,
        stages: &HashMap<StageKind, Arc<dyn Stage>>,
        visiting: &mut HashSet<StageKind>,
        done: &mut HashSet<StageKind>,
    ) -> Result<(), PipelineError> {
        if done.contains(&kind) {
            return Ok(());
        }
        if !visiting.insert(kind) {
            return Err(PipelineError::Cycle(kind));
        }
        if let Some(stage) = stages.get(&kind) {
            for &upstream in stage.upstream() {
                visit(upstream, stages, visiting, done)?;
            }
        }
        visiting.remove(&kind);
        done.insert(kind);
        Ok(())
    }

    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    let mut kinds: Vec<StageKind> = stages.keys().copied().collect();
    kinds.sort();
    for kind in kinds {
        visit(kind, stages, &mut visiting, &mut done)?;
    }
    Ok(())
}

/// State of one pipeline run: stages, shared context, memo table, counters.
pub struct Pipeline {
    context: Arc<StageContext>,
    stages: HashMap<StageKind, Arc<dyn Stage>>,
    memo: DashMap<TaskKey, Arc<OnceCell<TaskOutcome>>>,
    counters: DashMap<StageKind, StageCounters>,
}

impl Pipeline {
    pub fn builder(context: StageContext) -> PipelineBuilder {
        PipelineBuilder::new(context)
    }

    /// A pipeline with the four standard stages.
    pub fn standard(context: StageContext) -> Result<Self, PipelineError> {
        Self::builder(context).standard_stages().build()
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// Ensure the artifacts of `kind` exist for `identity`.
    ///
    /// Never panics or propagates past this boundary: every failure comes
    /// back as a tagged [`StageError`]. Outcomes (including failures) are
    /// memoized for the life of the pipeline.
    pub fn ensure<'a>(
        &'a self,
        kind: StageKind,
        identity: &'a Identity,
    ) -> BoxFuture<'a, TaskOutcome> {
        async move {
            let cell = self
                .memo
                .entry((kind, identity.clone()))
                .or_default()
                .clone();

            cell.get_or_init(|| async {
                let outcome = self.execute(kind, identity).await;
                self.record(kind, identity, &outcome);
                outcome
            })
            .await
            .clone()
        }
        .boxed()
    }

    async fn execute(&self, kind: StageKind, identity: &Identity) -> TaskOutcome {
        let stage = self
            .stages
            .get(&kind)
            .ok_or_else(|| StageError::NotFound(format!("stage {} is not registered", kind)))?;
        let ctx = self.context.as_ref();

        let targets = stage.targets(identity, ctx)?;
        let missing: Vec<Artifact> = targets
            .iter()
            .filter(|a| !ctx.store.exists(&a.path))
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!(stage = %kind, %identity, "all artifacts exist, skipping");
            return Ok(StageOutput {
                stage: kind,
                identity: identity.clone(),
                artifacts: targets,
                cache_hit: true,
            });
        }

        let mut inputs = StageInputs::default();
        for dependency in stage.dependencies(identity, ctx)? {
            if !stage.upstream().contains(&dependency.stage) {
                return Err(StageError::DependencyUnresolved {
                    stage: dependency.stage,
                    identity: dependency.identity,
                    reason: format!("{} is not an upstream stage of {}", dependency.stage, kind),
                });
            }

            let outcome = self.ensure(dependency.stage, &dependency.identity).await;
            if let Err(e) = &outcome {
                if dependency.required {
                    warn!(
                        stage = %kind,
                        %identity,
                        dependency = %dependency.stage,
                        error = %e,
                        "required dependency failed, not generating"
                    );
                    return Err(StageError::DependencyUnresolved {
                        stage: dependency.stage,
                        identity: dependency.identity,
                        reason: e.to_string(),
                    });
                }
                warn!(
                    stage = %kind,
                    %identity,
                    dependency = %dependency.stage,
                    error = %e,
                    "optional dependency failed, continuing without it"
                );
            }
            inputs.push(dependency, outcome);
        }

        info!(stage = %kind, %identity, missing = missing.len(), "generating");
        stage.generate(identity, &missing, &inputs, ctx).await?;

        Ok(StageOutput {
            stage: kind,
            identity: identity.clone(),
            artifacts: targets,
            cache_hit: false,
        })
    }

    fn record(&self, kind: StageKind, identity: &Identity, outcome: &TaskOutcome) {
        let mut counters = self.counters.entry(kind).or_default();
        match outcome {
            Ok(out) if out.cache_hit => counters.cache_hits += 1,
            Ok(_) => counters.succeeded += 1,
            Err(e) => {
                counters.failed += 1;
                error!(stage = %kind, %identity, error_kind = e.tag(), error = %e, "stage failed");
            }
        }
    }

    /// Snapshot of the per-stage counters.
    pub fn counters(&self) -> BTreeMap<StageKind, StageCounters> {
        self.counters.iter().map(|e| (*e.key(), *e.value())).collect()
    }
}
