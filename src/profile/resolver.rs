//! Profile inheritance resolution.
//!
//! Walks `baseDefinition` links from a profile up through its ancestors and
//! derives the base resource type the hierarchy ultimately constrains.

use super::node::{ProfileCorpus, ProfileNode};
use crate::config::PipelineConfig;
use crate::identity::Identity;
use reqwest::Url;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Default bound on tree length.
pub const MAX_TREE_DEPTH: usize = 20;

/// Descendant-to-ancestor chain of profiles; the queried profile comes first.
#[derive(Debug, Clone, Default)]
pub struct ProfileTree {
    nodes: Vec<Arc<ProfileNode>>,
    truncated: bool,
}

impl ProfileTree {
    pub fn nodes(&self) -> &[Arc<ProfileNode>] {
        &self.nodes
    }

    /// The queried profile.
    pub fn leaf(&self) -> Option<&ProfileNode> {
        self.nodes.first().map(|n| n.as_ref())
    }

    /// The top-most profile reached.
    pub fn top(&self) -> Option<&ProfileNode> {
        self.nodes.last().map(|n| n.as_ref())
    }

    /// True when the walk stopped at the depth bound (likely a cycle).
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids along the chain, leaf first.
    pub fn identities(&self) -> Vec<&Identity> {
        self.nodes.iter().map(|n| &n.identity).collect()
    }

    /// The definitions along the chain as one pretty-printed JSON array.
    pub fn definitions_json(&self) -> String {
        let defs: Vec<&serde_json::Value> = self.nodes.iter().map(|n| &n.definition).collect();
        serde_json::to_string_pretty(&defs).unwrap_or_else(|_| "[]".to_string())
    }
}

/// The resource type underlying a profile hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BaseType {
    /// Lower-cased type name (e.g. `observation`).
    Known(String),
    /// Neither the override table nor the URL heuristic produced a type.
    Undeterminable,
}

impl BaseType {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BaseType::Known(t) => Some(t),
            BaseType::Undeterminable => None,
        }
    }
}

impl std::fmt::Display for BaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaseType::Known(t) => write!(f, "{}", t),
            BaseType::Undeterminable => write!(f, "undeterminable"),
        }
    }
}

/// Resolves profile trees and their base types.
#[derive(Debug, Clone)]
pub struct ProfileResolver {
    max_depth: usize,
    overrides: BTreeMap<String, String>,
}

impl Default for ProfileResolver {
    fn default() -> Self {
        Self::new(MAX_TREE_DEPTH, BTreeMap::new())
    }
}

impl ProfileResolver {
    pub fn new(max_depth: usize, overrides: BTreeMap<String, String>) -> Self {
        Self {
            max_depth: max_depth.max(1),
            overrides,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_tree_depth, config.base_overrides.clone())
    }

    /// Walk parent links starting at `identity`.
    ///
    /// Returns an empty tree if the profile is not in the corpus. The walk
    /// stops when a node has no parent reference, when the parent is not in
    /// the corpus, or when the tree reaches the depth bound.
    pub fn resolve_tree(&self, identity: &Identity, corpus: &ProfileCorpus) -> ProfileTree {
        let mut tree = ProfileTree::default();
        let mut current = match corpus.lookup(identity) {
            Some(node) => node.clone(),
            None => return tree,
        };

        loop {
            tree.nodes.push(current.clone());

            let Some(parent_ref) = current.parent_ref.as_deref() else {
                break;
            };
            let Some(parent) = corpus.resolve_ref(parent_ref) else {
                break;
            };
            if tree.nodes.len() >= self.max_depth {
                warn!(
                    profile = %identity,
                    depth = self.max_depth,
                    "profile tree depth bound reached, stopping resolution"
                );
                tree.truncated = true;
                break;
            }
            current = parent.clone();
        }

        tree
    }

    /// Derive the base type from the top node's parent reference.
    pub fn derive_base_type(&self, tree: &ProfileTree) -> BaseType {
        let Some(top) = tree.top() else {
            return BaseType::Undeterminable;
        };
        let Some(reference) = top.parent_ref.as_deref() else {
            warn!(profile = %top.identity, "top profile has no baseDefinition");
            return BaseType::Undeterminable;
        };

        if let Some(mapped) = self.overrides.get(reference) {
            return BaseType::Known(mapped.to_ascii_lowercase());
        }

        match type_from_reference(reference) {
            Some(t) => BaseType::Known(t),
            None => {
                warn!(
                    profile = %top.identity,
                    reference,
                    "could not determine base resource type"
                );
                BaseType::Undeterminable
            }
        }
    }
}

/// Final URL path segment, if it looks like a resource type name.
///
/// Accepts `PascalCase` identifiers only: an ASCII uppercase first letter
/// followed by ASCII letters and digits.
fn type_from_reference(reference: &str) -> Option<String> {
    let url = Url::parse(reference).ok()?;
    let segment = url.path_segments()?.last()?;

    let mut chars = segment.chars();
    let first = chars.next()?;
    if first.is_ascii_uppercase() && chars.all(|c| c.is_ascii_alphanumeric()) {
        Some(segment.to_ascii_lowercase())
    } else {
        None
    }
}
