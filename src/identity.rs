//! Identity: the case-insensitive name that keys every artifact.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Name of a resource or profile (e.g. `Patient`, `us-core-bmi`).
///
/// Equality and hashing ignore ASCII case, so `Patient` and `patient` key the
/// same artifacts. The original spelling is kept for display and prompts;
/// [`Identity::path_key`] is the only lower-cased form and is used for file
/// names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    /// The name as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased form used for path construction.
    pub fn path_key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the name can be used as a file name stem.
    ///
    /// Path separators and `..` would let a name escape its artifact
    /// directory.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty() && !self.0.contains(['/', '\\', '\0']) && !self.0.contains("..")
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
