//! Profile corpus and inheritance resolution.

mod node;
mod resolver;

pub use node::{CorpusError, ProfileCorpus, ProfileNode};
pub use resolver::{BaseType, ProfileResolver, ProfileTree, MAX_TREE_DEPTH};
