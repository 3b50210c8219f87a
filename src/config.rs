//! Run configuration.
//!
//! Everything that used to be a fixed directory name or lookup table lives in
//! [`PipelineConfig`], built once and shared read-only by every component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the generation service credential.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Environment variable overriding the generation model.
pub const MODEL_ENV: &str = "GEMINI_MODEL";

const DEFAULT_MODEL: &str = "gemini-2.5-pro-preview-05-06";
const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Base resources profiled by US Core.
pub const US_CORE_RESOURCES: &[&str] = &[
    "AllergyIntolerance",
    "CarePlan",
    "CareTeam",
    "Condition",
    "Coverage",
    "Device",
    "DiagnosticReport",
    "DocumentReference",
    "Encounter",
    "Goal",
    "Immunization",
    "Location",
    "Medication",
    "MedicationDispense",
    "MedicationRequest",
    "Observation",
    "Organization",
    "Patient",
    "Practitioner",
    "PractitionerRole",
    "Procedure",
    "Provenance",
    "QuestionnaireResponse",
    "RelatedPerson",
    "ServiceRequest",
    "Specimen",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0} environment variable is not set")]
    MissingCredential(&'static str),
}

/// One side of the comparison (e.g. R4 or the R6 build).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecVersion {
    /// Short label, used as a directory name and artifact variant (`r4`).
    pub label: String,
    /// Human-readable title for generated pages (`FHIR R4`).
    pub title: String,
    /// Base URL of the narrative resource pages.
    pub page_base_url: String,
    /// Base URL of the `<resource>-definitions.html` pages.
    pub definitions_base_url: String,
}

impl SpecVersion {
    pub fn new(
        label: impl Into<String>,
        title: impl Into<String>,
        page_base_url: impl Into<String>,
        definitions_base_url: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            title: title.into(),
            page_base_url: page_base_url.into(),
            definitions_base_url: definitions_base_url.into(),
        }
    }

    pub fn r4() -> Self {
        Self::new(
            "r4",
            "FHIR R4",
            "https://hl7.org/fhir/R4/",
            "https://hl7.org/fhir/R4/",
        )
    }

    pub fn r6() -> Self {
        Self::new(
            "r6",
            "FHIR R6/Build",
            "https://build.fhir.org/",
            "https://build.fhir.org/",
        )
    }

    /// URL of the narrative page for a resource.
    pub fn page_url(&self, resource_key: &str) -> String {
        format!("{}{}.html", self.page_base_url, resource_key)
    }

    /// URL of the formal definitions page for a resource.
    pub fn definitions_url(&self, resource_key: &str) -> String {
        format!("{}{}-definitions.html", self.definitions_base_url, resource_key)
    }
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory all artifacts are written under.
    pub root_dir: PathBuf,
    /// Version being migrated from.
    pub source_version: SpecVersion,
    /// Version being migrated to.
    pub target_version: SpecVersion,
    /// Directory name under `analysis/` for migration reports.
    pub migration_kind: String,
    /// Directory holding downloaded profile definitions and documents.
    pub profiles_dir: String,
    /// Exact `baseDefinition` reference → base resource type.
    pub base_overrides: BTreeMap<String, String>,
    /// Upper bound on the length of a resolved profile tree.
    pub max_tree_depth: usize,
    /// Resources compared by a full run.
    pub resource_names: Vec<String>,
    /// Page listing the profiles to sync.
    pub profile_index_url: String,
    /// Directory with `summarize.txt` / `diff_example.md` overrides.
    pub templates_dir: Option<PathBuf>,
    /// How many identities may be processed at once.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut base_overrides = BTreeMap::new();
        base_overrides.insert(
            "http://hl7.org/fhir/StructureDefinition/vitalsigns".to_string(),
            "Observation".to_string(),
        );

        Self {
            root_dir: PathBuf::from("."),
            source_version: SpecVersion::r4(),
            target_version: SpecVersion::r6(),
            migration_kind: "us-core-migration".to_string(),
            profiles_dir: "us-core-profiles".to_string(),
            base_overrides,
            max_tree_depth: 20,
            resource_names: US_CORE_RESOURCES.iter().map(|s| s.to_string()).collect(),
            profile_index_url:
                "https://build.fhir.org/ig/HL7/US-Core/profiles-and-extensions.html".to_string(),
            templates_dir: None,
            concurrency: 1,
        }
    }
}

impl PipelineConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Load from a YAML file; missing keys take their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn with_root(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    pub fn with_override(mut self, reference: impl Into<String>, base: impl Into<String>) -> Self {
        self.base_overrides.insert(reference.into(), base.into());
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Both versions, source first.
    pub fn versions(&self) -> [&SpecVersion; 2] {
        [&self.source_version, &self.target_version]
    }

    /// Look up a version by its label.
    pub fn version(&self, label: &str) -> Option<&SpecVersion> {
        self.versions().into_iter().find(|v| v.label == label)
    }
}

/// Credentials and model selection for the generation service.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Read the credential (required) and model (optional) from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential(API_KEY_ENV))?;
        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var(MODEL_ENV) {
            if !model.trim().is_empty() {
                config.model = model;
            }
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}
