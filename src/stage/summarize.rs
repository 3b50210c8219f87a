//! Summarize: one structured markdown summary per version.

use super::{prompts, Stage, StageContext, StageError, StageInputs, StageKind, StageOutput};
use crate::identity::Identity;
use crate::store::{Artifact, ArtifactKind};
use async_trait::async_trait;
use tracing::info;

/// Summarizes each version's fetched documentation.
///
/// Versions are independent: only the missing summaries are generated, and
/// a failed version does not stop the others.
pub struct SummarizeStage;

impl SummarizeStage {
    async fn summarize_version(
        &self,
        identity: &Identity,
        artifact: &Artifact,
        documents: &StageOutput,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        let label = artifact.variant().unwrap_or_default();
        let version = ctx
            .config
            .version(label)
            .ok_or_else(|| StageError::NotFound(format!("version {}", label)))?;
        let document = documents
            .artifact(Some(label))
            .ok_or_else(|| StageError::NotFound(format!("{} document for {}", label, identity)))?;

        info!(%identity, version = %label, "generating summary");
        let html = ctx.store.read(&document.path).await?;
        let parts = prompts::summarize(&ctx.templates, identity, version, html);
        ctx.generate_into(artifact, parts).await
    }
}

#[async_trait]
impl Stage for SummarizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Summarize
    }

    fn upstream(&self) -> &'static [StageKind] {
        &[StageKind::DocFetch]
    }

    fn targets(&self, identity: &Identity, ctx: &StageContext) -> Result<Vec<Artifact>, StageError> {
        ctx.config
            .versions()
            .iter()
            .map(|v| {
                ctx.store
                    .artifact(ArtifactKind::Summary, identity, Some(&v.label))
                    .map_err(StageError::from)
            })
            .collect()
    }

    async fn generate(
        &self,
        identity: &Identity,
        missing: &[Artifact],
        inputs: &StageInputs,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        let documents = inputs
            .get(StageKind::DocFetch, identity)
            .ok_or_else(|| StageError::NotFound(format!("documents for {}", identity)))?;

        let mut first_error = None;
        for artifact in missing {
            if let Err(e) = self.summarize_version(identity, artifact, documents, ctx).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
