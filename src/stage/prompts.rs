//! Prompt construction for the generating stages.

use crate::config::{ConfigError, SpecVersion};
use crate::generate::PromptPart;
use crate::identity::Identity;
use std::path::Path;

const SUMMARIZE_EXAMPLE: &str = include_str!("../../templates/summarize.txt");
const DIFF_EXAMPLE: &str = include_str!("../../templates/diff_example.md");

/// Example documents that steer generation style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    pub summarize_example: String,
    pub diff_example: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            summarize_example: SUMMARIZE_EXAMPLE.to_string(),
            diff_example: DIFF_EXAMPLE.to_string(),
        }
    }
}

impl Templates {
    /// Built-in templates, each replaced by `summarize.txt` / `diff_example.md`
    /// from `dir` when that file exists.
    pub fn load(dir: Option<&Path>) -> Result<Self, ConfigError> {
        let mut templates = Self::default();
        let Some(dir) = dir else {
            return Ok(templates);
        };

        if let Some(text) = read_optional(&dir.join("summarize.txt"))? {
            templates.summarize_example = text;
        }
        if let Some(text) = read_optional(&dir.join("diff_example.md"))? {
            templates.diff_example = text;
        }
        Ok(templates)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Summary of one version's documentation page.
///
/// The example layout and the page travel as inline parts around the
/// instruction.
pub fn summarize(
    templates: &Templates,
    identity: &Identity,
    version: &SpecVersion,
    page_html: String,
) -> Vec<PromptPart> {
    vec![
        PromptPart::inline("text/plain", templates.summarize_example.clone().into_bytes()),
        PromptPart::text(format!(
            "Turn the definitions below into a reference that is easy to read and \
             work with later. Write markdown for narrative and embed yaml blocks \
             for structured details. Cover background and scope (summarized), then \
             every element, constraint and search parameter in yaml. Follow the \
             example above. The resource is {} in {} ({}).",
            identity, version.title, version.label
        )),
        PromptPart::inline("text/html", page_html.into_bytes()),
    ]
}

/// Migration guide between two version summaries.
pub fn diff(
    templates: &Templates,
    identity: &Identity,
    source: (&SpecVersion, &str),
    target: (&SpecVersion, &str),
) -> Vec<PromptPart> {
    let (from, from_md) = source;
    let (to, to_md) = target;
    let from_tag = from.label.to_ascii_uppercase();
    let to_tag = to.label.to_ascii_uppercase();

    let text = format!(
        r#"You are a FHIR expert and a careful technical writer.
Compare two markdown documents describing the {from} and {to} versions of one resource and write a migration guide for implementers.

Focus on meaningful change:
1. Executive summary of the most impactful changes and key actions.
2. Core definition changes: added or removed elements, type changes, cardinality, renamed elements, bindings.
3. Scope and usage evolution.
4. Data modeling impacts.
5. Significant constraint changes (added, removed, modified).
6. Search parameter differences and their effect on queries.
7. Key migration actions.

Mark breaking changes clearly. Prefer narrative and lists over tables. Do not dwell on wording tweaks and do not paste large yaml or json blocks.

Match the style of this example:
<EXAMPLE_ANALYSIS>
{example}
</EXAMPLE_ANALYSIS>

Resource: {identity}

<{from_tag}_MARKDOWN>
{from_md}
</{from_tag}_MARKDOWN>

<{to_tag}_MARKDOWN>
{to_md}
</{to_tag}_MARKDOWN>
"#,
        from = from.title,
        to = to.title,
        example = templates.diff_example,
    );
    vec![PromptPart::text(text)]
}

/// Everything the migration report prompt is built from.
pub struct MigrationPrompt<'a> {
    pub profile: &'a Identity,
    /// Lower-cased base type, or a label saying it is unknown.
    pub base_type: &'a str,
    pub source: &'a SpecVersion,
    pub target: &'a SpecVersion,
    pub profile_json: &'a str,
    pub hierarchy_json: &'a str,
    pub profile_html: &'a str,
    pub base_diff: &'a str,
}

impl MigrationPrompt<'_> {
    pub fn build(&self) -> Vec<PromptPart> {
        let p = self.profile;
        let base = self.base_type;
        let from = &self.source.title;
        let to = &self.target.title;

        let text = format!(
            r#"You are an expert in FHIR and US Core. Write a short, actionable {from} to {to} migration impact report for the profile `{p}`. Be plain-spoken and direct.

The report helps the editors of `{p}` understand the practical consequences of moving the guide to {to}. Leave out base changes that do not affect how `{p}` is defined or used.

Inputs: the profile definition, the definitions of the profile and its ancestors, the rendered profile page, and a summary of changes to `{base}` between the two versions.

The report has exactly these sections:

## Impact of {to} Changes on `{p}`
Identify the elements, Must Support flags, cardinalities, bindings and patterns `{p}` relies on. For each one materially affected by a change to `{base}`, explain the change and its consequence. Skip aspects that are not significantly affected.

## Migration Summary & Actionable Takeaways for `{p}`
1. Profile changes required.
2. Implementation changes required.
3. Optional: new features that fit the intent of the profile.

## Overall Migration Impact
Start with "Impact: None", "Impact: Low" or "Impact: Significant", then explain briefly.
- None: compatible without changes.
- Low: a few easy changes (new codes, a renamed element, a remapped datatype).
- Significant: new design decisions needing community consensus.

<targetProfileJson profileId="{p}">
{profile_json}
</targetProfileJson>

<profileHierarchyJson>
{hierarchy_json}
</profileHierarchyJson>

<targetProfileHtml profileId="{p}">
{profile_html}
</targetProfileHtml>

<baseResourceDiff baseResourceType="{base}">
{base_diff}
</baseResourceDiff>

Write the migration report for `{p}`."#,
            profile_json = self.profile_json,
            hierarchy_json = self.hierarchy_json,
            profile_html = self.profile_html,
            base_diff = self.base_diff,
        );
        vec![PromptPart::text(text)]
    }
}
