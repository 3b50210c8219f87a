//! Filesystem-backed artifact store.

use super::types::{Artifact, ArtifactKind, StoreError, StoreResult};
use crate::config::PipelineConfig;
use crate::identity::Identity;
use futures::{Stream, StreamExt};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Owns every on-disk path the pipeline reads or writes.
///
/// Paths are a pure function of (kind, identity, variant) and the directory
/// names in the configuration. Writes go to a temp file in the target
/// directory and are renamed into place, so a reader never observes a
/// partially written artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    migration_kind: String,
    profiles_dir: String,
}

impl ArtifactStore {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            root: config.root_dir.clone(),
            migration_kind: config.migration_kind.clone(),
            profiles_dir: config.profiles_dir.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the path of an artifact.
    ///
    /// Versioned kinds (`Document`, `Summary`) require a variant.
    pub fn path_for(
        &self,
        kind: ArtifactKind,
        identity: &Identity,
        variant: Option<&str>,
    ) -> StoreResult<PathBuf> {
        if !identity.is_path_safe() {
            return Err(StoreError::InvalidIdentity {
                identity: identity.clone(),
            });
        }
        let key = identity.path_key();
        let version = match (kind.is_versioned(), variant) {
            (true, Some(v)) => v,
            (true, None) => return Err(StoreError::MissingVariant { kind }),
            (false, _) => "",
        };

        let path = match kind {
            ArtifactKind::Document => self.root.join(version).join(format!("{}.html", key)),
            ArtifactKind::Summary => self
                .root
                .join("summaries")
                .join(version)
                .join(format!("{}.md", key)),
            ArtifactKind::Diff => self.root.join("analysis").join("diff").join(format!("{}.md", key)),
            ArtifactKind::Migration => self
                .root
                .join("analysis")
                .join(&self.migration_kind)
                .join(format!("{}.md", key)),
            ArtifactKind::ProfileDefinition => self
                .profile_json_dir()
                .join(format!("StructureDefinition-{}.json", key)),
            ArtifactKind::ProfileDocument => self
                .profiles_root()
                .join("html")
                .join(format!("StructureDefinition-{}.html", key)),
        };
        Ok(path)
    }

    /// Resolve a full [`Artifact`] handle.
    pub fn artifact(
        &self,
        kind: ArtifactKind,
        identity: &Identity,
        variant: Option<&str>,
    ) -> StoreResult<Artifact> {
        let path = self.path_for(kind, identity, variant)?;
        Ok(Artifact {
            kind,
            identity: identity.clone(),
            variant: variant.map(str::to_string),
            path,
        })
    }

    /// Directory the profile corpus is loaded from.
    pub fn profile_json_dir(&self) -> PathBuf {
        self.profiles_root().join("json")
    }

    fn profiles_root(&self) -> PathBuf {
        self.root.join(&self.profiles_dir)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Read an artifact as text.
    pub async fn read(&self, path: &Path) -> StoreResult<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    /// Write the full content of an artifact, replacing any previous file.
    pub fn write(&self, path: &Path, content: &str) -> StoreResult<()> {
        let mut tmp = self.temp_file_for(path)?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        Self::commit(tmp, path)
    }

    /// Write an artifact from a stream of text chunks.
    ///
    /// Chunks are appended in order. If the stream yields an error the temp
    /// file is discarded and any existing target is left untouched.
    /// Returns the number of bytes written.
    pub async fn write_stream<S, E>(&self, path: &Path, mut chunks: S) -> StoreResult<u64>
    where
        S: Stream<Item = Result<String, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut tmp = self.temp_file_for(path)?;
        let mut written = 0u64;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| StoreError::Interrupted {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            tmp.write_all(chunk.as_bytes())
                .map_err(|e| StoreError::io(tmp.path(), e))?;
            written += chunk.len() as u64;
        }

        Self::commit(tmp, path)?;
        Ok(written)
    }

    fn temp_file_for(&self, path: &Path) -> StoreResult<NamedTempFile> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))
    }

    fn commit(mut tmp: NamedTempFile, path: &Path) -> StoreResult<()> {
        tmp.flush().map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| StoreError::io(path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn store_in(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(&PipelineConfig::new(dir))
    }

    #[test]
    fn layout_matches_documented_paths() {
        let store = store_in(Path::new("/out"));
        let id = Identity::new("Patient");

        let doc = store.path_for(ArtifactKind::Document, &id, Some("r4")).unwrap();
        assert_eq!(doc, PathBuf::from("/out/r4/patient.html"));

        let summary = store.path_for(ArtifactKind::Summary, &id, Some("r6")).unwrap();
        assert_eq!(summary, PathBuf::from("/out/summaries/r6/patient.md"));

        let diff = store.path_for(ArtifactKind::Diff, &id, None).unwrap();
        assert_eq!(diff, PathBuf::from("/out/analysis/diff/patient.md"));

        let report = store
            .path_for(ArtifactKind::Migration, &Identity::new("us-core-bmi"), None)
            .unwrap();
        assert_eq!(report, PathBuf::from("/out/analysis/us-core-migration/us-core-bmi.md"));

        let html = store
            .path_for(ArtifactKind::ProfileDocument, &Identity::new("us-core-bmi"), None)
            .unwrap();
        assert_eq!(
            html,
            PathBuf::from("/out/us-core-profiles/html/StructureDefinition-us-core-bmi.html")
        );
    }

    #[test]
    fn unsafe_identity_has_no_path() {
        let store = store_in(Path::new("/out"));
        let err = store
            .path_for(ArtifactKind::Document, &Identity::new("../../x"), Some("r4"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentity { .. }));
        assert!(store
            .path_for(ArtifactKind::Diff, &Identity::new("nested/diff"), None)
            .is_err());
    }

    #[test]
    fn versioned_kinds_need_a_variant() {
        let store = store_in(Path::new("/out"));
        let id = Identity::new("Patient");
        for kind in [ArtifactKind::Document, ArtifactKind::Summary] {
            assert!(kind.is_versioned());
            assert!(matches!(
                store.path_for(kind, &id, None),
                Err(StoreError::MissingVariant { .. })
            ));
        }
        assert!(!ArtifactKind::Diff.is_versioned());
        let diff = store.path_for(ArtifactKind::Diff, &id, Some("r4")).unwrap();
        assert_eq!(diff, PathBuf::from("/out/analysis/diff/patient.md"));
    }

    #[test]
    fn path_is_case_insensitive_in_identity() {
        let store = store_in(Path::new("/out"));
        let a = store.path_for(ArtifactKind::Diff, &Identity::new("CarePlan"), None).unwrap();
        let b = store.path_for(ArtifactKind::Diff, &Identity::new("careplan"), None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn versioned_kind_without_variant_is_rejected() {
        let store = store_in(Path::new("/out"));
        let err = store
            .path_for(ArtifactKind::Summary, &Identity::new("Patient"), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingVariant { .. }));
    }

    #[test]
    fn write_creates_directories_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let path = store
            .path_for(ArtifactKind::Diff, &Identity::new("Goal"), None)
            .unwrap();

        store.write(&path, "first version, longer").unwrap();
        store.write(&path, "second").unwrap();

        assert!(store.exists(&path));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }

    #[tokio::test]
    async fn write_stream_concatenates_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let path = dir.path().join("out.md");

        let chunks = stream::iter(vec![
            Ok::<_, String>("# Title\n".to_string()),
            Ok("body".to_string()),
        ]);
        let written = store.write_stream(&path, chunks).await.unwrap();

        assert_eq!(written, 12);
        assert_eq!(store.read(&path).await.unwrap(), "# Title\nbody");
    }

    #[test]
    fn failed_stream_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let path = dir.path().join("analysis").join("broken.md");

        let chunks = stream::iter(vec![
            Ok("partial".to_string()),
            Err("connection reset"),
        ]);
        let err = tokio_test::block_on(store.write_stream(&path, chunks)).unwrap_err();

        assert!(matches!(err, StoreError::Interrupted { .. }));
        assert!(!store.exists(&path));
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_stream_keeps_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let path = dir.path().join("kept.md");
        store.write(&path, "good").unwrap();

        let chunks = stream::iter(vec![Err::<String, _>("boom")]);
        assert!(tokio_test::block_on(store.write_stream(&path, chunks)).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "good");
    }
}
