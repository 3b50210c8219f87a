//! Artifact store.
//!
//! The only component that knows where artifacts live on disk. Stages ask it
//! for paths, check existence through it and write through it.

mod disk;
mod types;

pub use disk::ArtifactStore;
pub use types::{Artifact, ArtifactKind, StoreError, StoreResult};
