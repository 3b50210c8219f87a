//! DocFetch: one composed HTML page per version.

use super::{Stage, StageContext, StageError, StageInputs, StageKind};
use crate::config::SpecVersion;
use crate::identity::Identity;
use crate::store::{Artifact, ArtifactKind};
use async_trait::async_trait;
use tracing::{info, warn};

/// Fetches the narrative and definitions pages of each version.
///
/// Each fetch is best-effort: a failed section becomes a placeholder block.
/// A version whose sections all failed is not written, and the stage fails.
pub struct DocFetchStage;

impl DocFetchStage {
    async fn fetch_version(
        &self,
        identity: &Identity,
        version: &SpecVersion,
        artifact: &Artifact,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        let key = identity.path_key();
        let urls = [version.page_url(&key), version.definitions_url(&key)];

        let mut blocks = Vec::with_capacity(urls.len());
        let mut fetched = 0;
        for url in &urls {
            let segment = ctx.fetcher.fetch_segment(url).await;
            if !segment.is_placeholder() {
                fetched += 1;
            }
            blocks.push(format!("<h2>Content from {}</h2>\n{}", url, segment.into_markup()));
        }

        if fetched == 0 {
            warn!(%identity, version = %version.label, "every section failed to fetch");
            return Err(StageError::Service(format!(
                "no {} documentation could be fetched for {}",
                version.title, identity
            )));
        }

        let title = format!("{}: {}", version.title, identity);
        ctx.store.write(&artifact.path, &compose_page(&title, &blocks))?;
        info!(%identity, version = %version.label, path = %artifact.path.display(), "document saved");
        Ok(())
    }
}

#[async_trait]
impl Stage for DocFetchStage {
    fn kind(&self) -> StageKind {
        StageKind::DocFetch
    }

    fn upstream(&self) -> &'static [StageKind] {
        &[]
    }

    fn targets(&self, identity: &Identity, ctx: &StageContext) -> Result<Vec<Artifact>, StageError> {
        ctx.config
            .versions()
            .iter()
            .map(|v| {
                ctx.store
                    .artifact(ArtifactKind::Document, identity, Some(&v.label))
                    .map_err(StageError::from)
            })
            .collect()
    }

    async fn generate(
        &self,
        identity: &Identity,
        missing: &[Artifact],
        _inputs: &StageInputs,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        let mut first_error = None;
        for artifact in missing {
            let version = artifact
                .variant()
                .and_then(|label| ctx.config.version(label))
                .ok_or_else(|| StageError::NotFound(format!("version for {}", artifact.path.display())))?;

            if let Err(e) = self.fetch_version(identity, version, artifact, ctx).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// A standalone HTML page with a title and one block per source.
pub fn compose_page(title: &str, blocks: &[String]) -> String {
    let body: Vec<String> = blocks
        .iter()
        .map(|b| format!("    <div class=\"content-block\">{}</div>", b))
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{ font-family: sans-serif; margin: 20px; }}
        .content-block {{ border: 1px solid #eee; margin-bottom: 20px; padding: 15px; }}
        .content-block h2 {{ margin-top: 0; font-size: 1.2em; border-bottom: 1px solid #ddd; }}
    </style>
</head>
<body>
    <h1>{title}</h1>
{body}
</body>
</html>
"#,
        title = title,
        body = body.join("\n")
    )
}
