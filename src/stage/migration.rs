//! MigrationAnalysis: per-profile migration impact report.

use super::prompts::MigrationPrompt;
use super::{Dependency, Stage, StageContext, StageError, StageInputs, StageKind};
use crate::identity::Identity;
use crate::profile::{BaseType, ProfileTree};
use crate::store::{Artifact, ArtifactKind};
use async_trait::async_trait;
use tracing::{info, warn};

/// Reports how a version change affects one profile.
///
/// The difference analysis of the profile's base type is an optional input:
/// when it cannot be produced, or the base type cannot be determined, the
/// report is generated with a placeholder in its place.
pub struct MigrationStage;

impl MigrationStage {
    fn resolve(&self, identity: &Identity, ctx: &StageContext) -> Result<(ProfileTree, BaseType), StageError> {
        let tree = ctx.resolver.resolve_tree(identity, &ctx.corpus);
        if tree.is_empty() {
            return Err(StageError::NotFound(format!("profile {}", identity)));
        }
        let base = ctx.resolver.derive_base_type(&tree);
        Ok((tree, base))
    }

    async fn base_diff(&self, base: &BaseType, inputs: &StageInputs, ctx: &StageContext) -> String {
        let Some(base_type) = base.as_str() else {
            return "<!-- base resource type could not be determined -->".to_string();
        };
        let base_id = Identity::new(base_type);

        let Some(diff) = inputs
            .get(StageKind::Diff, &base_id)
            .and_then(|out| out.artifact(None))
        else {
            if let Some(e) = inputs.failure(StageKind::Diff, &base_id) {
                warn!(base = base_type, error = %e, "base diff unavailable, continuing without it");
            }
            return format!("<!-- difference analysis for {} not found -->", base_type);
        };

        match ctx.store.read(&diff.path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %diff.path.display(), error = %e, "could not read base diff");
                format!("<!-- error reading difference analysis {} -->", diff.path.display())
            }
        }
    }

    async fn profile_html(&self, identity: &Identity, ctx: &StageContext) -> String {
        let path = match ctx.store.path_for(ArtifactKind::ProfileDocument, identity, None) {
            Ok(p) => p,
            Err(e) => return format!("<!-- profile page unavailable: {} -->", e),
        };
        if !ctx.store.exists(&path) {
            warn!(profile = %identity, path = %path.display(), "profile page not found");
            return format!("<!-- profile page {} not found -->", path.display());
        }
        match ctx.store.read(&path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(profile = %identity, error = %e, "could not read profile page");
                format!("<!-- error reading profile page {} -->", path.display())
            }
        }
    }
}

#[async_trait]
impl Stage for MigrationStage {
    fn kind(&self) -> StageKind {
        StageKind::MigrationAnalysis
    }

    fn upstream(&self) -> &'static [StageKind] {
        &[StageKind::Diff]
    }

    fn targets(&self, identity: &Identity, ctx: &StageContext) -> Result<Vec<Artifact>, StageError> {
        if ctx.corpus.lookup(identity).is_none() {
            return Err(StageError::NotFound(format!("profile {}", identity)));
        }
        Ok(vec![ctx.store.artifact(ArtifactKind::Migration, identity, None)?])
    }

    fn dependencies(&self, identity: &Identity, ctx: &StageContext) -> Result<Vec<Dependency>, StageError> {
        let (_, base) = self.resolve(identity, ctx)?;
        Ok(match base {
            BaseType::Known(t) => vec![Dependency::optional(StageKind::Diff, Identity::new(t))],
            BaseType::Undeterminable => Vec::new(),
        })
    }

    async fn generate(
        &self,
        identity: &Identity,
        missing: &[Artifact],
        inputs: &StageInputs,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        let (tree, base) = self.resolve(identity, ctx)?;
        let leaf = tree
            .leaf()
            .ok_or_else(|| StageError::NotFound(format!("profile {}", identity)))?;
        info!(
            profile = %identity,
            depth = tree.len(),
            base_type = %base,
            truncated = tree.is_truncated(),
            "resolved profile tree"
        );

        let profile_json = serde_json::to_string_pretty(&leaf.definition)
            .map_err(|e| StageError::Service(format!("cannot serialize {}: {}", identity, e)))?;
        let hierarchy_json = tree.definitions_json();
        let profile_html = self.profile_html(identity, ctx).await;
        let base_diff = self.base_diff(&base, inputs, ctx).await;
        let base_label = base.to_string();

        let parts = MigrationPrompt {
            profile: identity,
            base_type: &base_label,
            source: &ctx.config.source_version,
            target: &ctx.config.target_version,
            profile_json: &profile_json,
            hierarchy_json: &hierarchy_json,
            profile_html: &profile_html,
            base_diff: &base_diff,
        }
        .build();

        for artifact in missing {
            ctx.generate_into(artifact, parts.clone()).await?;
        }
        Ok(())
    }
}
