//! Common test utilities for pipeline integration tests.
//!
//! Provides temp workspaces, scripted spec pages and profile definitions.
//! Generation and fetching use the crate's recording mocks; nothing touches
//! the network.

#![allow(dead_code)]

use fhir_compare::{
    ArtifactKind, ArtifactStore, DocumentFetcher, Identity, MockFetcher, Pipeline,
    PipelineConfig, ProfileCorpus, StageContext, TextGenerator,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub use fhir_compare::MockGenerator;

pub const SD: &str = "http://hl7.org/fhir/StructureDefinition/";

/// A spec page wrapping `body` in the element the fetcher extracts.
pub fn spec_page(body: &str) -> String {
    format!(
        r#"<html><body><div id="nav">menu</div><div id="segment-content">{}</div></body></html>"#,
        body
    )
}

/// Fetcher that serves a generic spec page for every URL.
pub fn spec_fetcher() -> MockFetcher {
    MockFetcher::new().with_fallback(spec_page("<h1>Resource</h1><table>elements</table>"))
}

/// A StructureDefinition for a US Core style profile.
pub fn profile_definition(id: &str, base: &str) -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "id": id,
        "url": format!("http://hl7.org/fhir/us/core/StructureDefinition/{}", id),
        "name": id,
        "status": "active",
        "kind": "resource",
        "baseDefinition": base,
        "differential": { "element": [] },
    })
}

/// Base URL of the implementation guide in the default configuration.
pub const IG: &str = "https://build.fhir.org/ig/HL7/US-Core/";

/// An index page listing `profiles` plus one extension.
pub fn ig_index(profiles: &[&str]) -> String {
    let items: Vec<String> = profiles
        .iter()
        .map(|id| format!(r#"<li><a href="StructureDefinition-{}.html">{}</a></li>"#, id, id))
        .collect();
    format!(
        r#"<html><body>
<h3 id="profiles">Profiles</h3>
<ul>{}</ul>
<h3 id="extensions">Extensions</h3>
<ul><li><a href="StructureDefinition-us-core-race.html">Race</a></li></ul>
</body></html>"#,
        items.join("\n")
    )
}

/// A rendered profile page with tabbed element views.
pub fn ig_profile_page(id: &str) -> String {
    format!(
        r#"<html><head><script src="x.js"></script></head><body>
<h2 id="root">{id}</h2>
<div id="tabs"><div id="tabs-diff">diff view</div><div id="tabs-key" style="display:none">key elements of {id}</div></div>
<script type="text/javascript" src="assets/js/jquery.js"></script>
<footer>footer</footer></body></html>"#,
        id = id
    )
}

/// A downloadable definition constraining Patient, with narrative and snapshot.
pub fn ig_profile_json(id: &str) -> String {
    let mut definition = profile_definition(id, &format!("{}Patient", SD));
    definition["text"] = json!({ "div": "<div>narrative</div>" });
    definition["snapshot"] = json!({ "element": [{ "id": "Patient" }] });
    definition.to_string()
}

/// Add the index and both files of each profile to `fetcher`.
pub fn ig_fetcher(fetcher: MockFetcher, profiles: &[&str]) -> MockFetcher {
    let mut fetcher =
        fetcher.with_page(format!("{}profiles-and-extensions.html", IG), ig_index(profiles));
    for id in profiles {
        fetcher = fetcher
            .with_page(
                format!("{}StructureDefinition-{}.html", IG, id),
                ig_profile_page(id),
            )
            .with_page(
                format!("{}StructureDefinition-{}.json", IG, id),
                ig_profile_json(id),
            );
    }
    fetcher
}

/// Temp directory plus the configuration rooted in it.
pub struct Workspace {
    dir: TempDir,
    pub config: PipelineConfig,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = PipelineConfig::new(dir.path());
        Self { dir, config }
    }

    pub fn with_config(mut self, f: impl FnOnce(PipelineConfig) -> PipelineConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.config)
    }

    pub fn path(&self, kind: ArtifactKind, identity: &str, variant: Option<&str>) -> PathBuf {
        self.store()
            .path_for(kind, &Identity::new(identity), variant)
            .expect("artifact path")
    }

    /// Write an artifact directly, bypassing the pipeline.
    pub fn seed(&self, kind: ArtifactKind, identity: &str, variant: Option<&str>, content: &str) {
        let path = self.path(kind, identity, variant);
        self.store().write(&path, content).expect("seed artifact");
    }

    pub fn read(&self, kind: ArtifactKind, identity: &str, variant: Option<&str>) -> String {
        std::fs::read_to_string(self.path(kind, identity, variant)).expect("read artifact")
    }

    pub fn exists(&self, kind: ArtifactKind, identity: &str, variant: Option<&str>) -> bool {
        self.path(kind, identity, variant).is_file()
    }

    /// Save a profile definition where the corpus loader looks for it.
    pub fn seed_profile(&self, definition: &Value) {
        let id = definition["id"].as_str().expect("profile id");
        self.seed(
            ArtifactKind::ProfileDefinition,
            id,
            None,
            &serde_json::to_string_pretty(definition).expect("serialize profile"),
        );
    }

    pub fn pipeline(
        &self,
        generator: Arc<dyn TextGenerator>,
        fetcher: Arc<dyn DocumentFetcher>,
        corpus: ProfileCorpus,
    ) -> Pipeline {
        let context = StageContext::new(
            Arc::new(self.config.clone()),
            generator,
            fetcher,
            Arc::new(corpus),
        )
        .expect("stage context");
        Pipeline::standard(context).expect("valid pipeline")
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}
