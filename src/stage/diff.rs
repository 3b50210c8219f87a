//! Diff: cross-version migration guide for one resource.

use super::{prompts, Stage, StageContext, StageError, StageInputs, StageKind};
use crate::identity::Identity;
use crate::store::{Artifact, ArtifactKind};
use async_trait::async_trait;
use tracing::info;

pub struct DiffStage;

#[async_trait]
impl Stage for DiffStage {
    fn kind(&self) -> StageKind {
        StageKind::Diff
    }

    fn upstream(&self) -> &'static [StageKind] {
        &[StageKind::Summarize]
    }

    fn targets(&self, identity: &Identity, ctx: &StageContext) -> Result<Vec<Artifact>, StageError> {
        Ok(vec![ctx.store.artifact(ArtifactKind::Diff, identity, None)?])
    }

    async fn generate(
        &self,
        identity: &Identity,
        missing: &[Artifact],
        inputs: &StageInputs,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        let summaries = inputs
            .get(StageKind::Summarize, identity)
            .ok_or_else(|| StageError::NotFound(format!("summaries for {}", identity)))?;

        let [source, target] = ctx.config.versions();
        let summary_path = |label: &str| {
            summaries
                .artifact(Some(label))
                .map(|a| a.path.clone())
                .ok_or_else(|| StageError::NotFound(format!("{} summary for {}", label, identity)))
        };
        let source_md = ctx.store.read(&summary_path(&source.label)?).await?;
        let target_md = ctx.store.read(&summary_path(&target.label)?).await?;

        for artifact in missing {
            info!(%identity, "generating difference analysis");
            let parts = prompts::diff(
                &ctx.templates,
                identity,
                (source, &source_md),
                (target, &target_md),
            );
            ctx.generate_into(artifact, parts).await?;
        }
        Ok(())
    }
}
