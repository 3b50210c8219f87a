//! Profile definitions and the in-memory corpus.

use crate::identity::Identity;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from loading the profile corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a usable StructureDefinition: {0}")]
    InvalidDefinition(String),

    #[error("no profile definitions found in {0}")]
    Empty(PathBuf),
}

/// One parsed profile definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileNode {
    /// Profile id (e.g. `us-core-blood-pressure`).
    pub identity: Identity,
    /// Canonical URL, when the definition declares one.
    pub url: Option<String>,
    /// `baseDefinition`: another profile's URL/id, or a base resource URL.
    pub parent_ref: Option<String>,
    /// The full definition; opaque to the resolver.
    pub definition: Value,
}

impl ProfileNode {
    pub fn new(identity: impl Into<Identity>, parent_ref: Option<&str>) -> Self {
        Self {
            identity: identity.into(),
            url: None,
            parent_ref: parent_ref.map(str::to_string),
            definition: Value::Null,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Build a node from a StructureDefinition JSON document.
    ///
    /// Requires `resourceType == "StructureDefinition"`, an `id` and a `url`.
    pub fn from_definition(definition: Value) -> Result<Self, CorpusError> {
        let resource_type = definition.get("resourceType").and_then(Value::as_str);
        if resource_type != Some("StructureDefinition") {
            return Err(CorpusError::InvalidDefinition(format!(
                "resourceType is {:?}",
                resource_type
            )));
        }
        let url = definition
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| CorpusError::InvalidDefinition("missing url".into()))?
            .to_string();
        let id = definition
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CorpusError::InvalidDefinition(format!("{} has no id", url)))?
            .to_string();
        let parent_ref = definition
            .get("baseDefinition")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            identity: Identity::new(id),
            url: Some(url),
            parent_ref,
            definition,
        })
    }
}

/// All profile definitions known to a run.
///
/// Built once, then shared read-only. Parent references are resolved against
/// canonical URLs first and profile ids second.
#[derive(Debug, Clone, Default)]
pub struct ProfileCorpus {
    nodes: Vec<Arc<ProfileNode>>,
    by_id: HashMap<Identity, usize>,
    by_url: HashMap<String, usize>,
}

impl ProfileCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = ProfileNode>) -> Self {
        let mut corpus = Self::new();
        for node in nodes {
            corpus.insert(node);
        }
        corpus
    }

    /// Load every `*.json` StructureDefinition in a directory.
    ///
    /// Files that fail to parse or are not StructureDefinitions are skipped
    /// with a warning. An empty result is an error: nothing can be analyzed.
    pub fn load_dir(dir: &Path) -> Result<Self, CorpusError> {
        info!(dir = %dir.display(), "loading profile definitions");

        let entries = std::fs::read_dir(dir).map_err(|source| CorpusError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        files.sort();

        let mut corpus = Self::new();
        for path in files {
            let text = match std::fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable profile file");
                    continue;
                }
            };
            let parsed = serde_json::from_str::<Value>(&text)
                .map_err(|e| CorpusError::InvalidDefinition(e.to_string()))
                .and_then(ProfileNode::from_definition);
            match parsed {
                Ok(node) => {
                    debug!(profile = %node.identity, "loaded profile");
                    corpus.insert(node);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping profile file"),
            }
        }

        if corpus.is_empty() {
            return Err(CorpusError::Empty(dir.to_path_buf()));
        }
        info!(count = corpus.len(), "loaded profile definitions");
        Ok(corpus)
    }

    fn insert(&mut self, node: ProfileNode) {
        if let Some(&existing) = self.by_id.get(&node.identity) {
            warn!(profile = %node.identity, "duplicate profile id, keeping the later definition");
            if let Some(url) = &self.nodes[existing].url {
                self.by_url.remove(url);
            }
            if let Some(url) = &node.url {
                self.by_url.insert(url.clone(), existing);
            }
            self.nodes[existing] = Arc::new(node);
            return;
        }

        let index = self.nodes.len();
        self.by_id.insert(node.identity.clone(), index);
        if let Some(url) = &node.url {
            self.by_url.insert(url.clone(), index);
        }
        self.nodes.push(Arc::new(node));
    }

    /// Look up a profile by id.
    pub fn lookup(&self, identity: &Identity) -> Option<&Arc<ProfileNode>> {
        self.by_id.get(identity).map(|&i| &self.nodes[i])
    }

    /// Resolve a parent reference: canonical URL first, then profile id.
    pub fn resolve_ref(&self, reference: &str) -> Option<&Arc<ProfileNode>> {
        self.by_url
            .get(reference)
            .map(|&i| &self.nodes[i])
            .or_else(|| self.lookup(&Identity::new(reference)))
    }

    /// Find a profile by id or by definition file stem
    /// (`StructureDefinition-<id>`, with or without `.json`).
    pub fn find(&self, selector: &str) -> Option<&Arc<ProfileNode>> {
        let trimmed = selector.trim();
        let stem = trimmed.strip_suffix(".json").unwrap_or(trimmed);
        let id = stem.strip_prefix("StructureDefinition-").unwrap_or(stem);
        self.lookup(&Identity::new(id))
            .or_else(|| self.by_url.get(trimmed).map(|&i| &self.nodes[i]))
    }

    /// Profile ids in load order.
    pub fn identities(&self) -> Vec<Identity> {
        self.nodes.iter().map(|n| n.identity.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
