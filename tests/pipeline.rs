//! Stage pipeline behavior: caching, dependency gating, failure isolation.

mod common;

use common::{spec_fetcher, MockGenerator, Workspace};
use fhir_compare::{
    ArtifactKind, Identity, MockFetcher, Outcome, ProfileCorpus, StageError, StageKind,
    UnavailableGenerator,
};
use std::sync::Arc;

#[tokio::test]
async fn diff_pulls_every_upstream_stage() {
    let ws = Workspace::new();
    let generator = Arc::new(MockGenerator::with_response("# Patient changes"));
    let fetcher = Arc::new(spec_fetcher());
    let pipeline = ws.pipeline(generator.clone(), fetcher.clone(), ProfileCorpus::new());

    let out = pipeline
        .ensure(StageKind::Diff, &Identity::new("Patient"))
        .await
        .unwrap();

    assert!(!out.cache_hit);
    for version in ["r4", "r6"] {
        assert!(ws.exists(ArtifactKind::Document, "patient", Some(version)));
        assert!(ws.exists(ArtifactKind::Summary, "patient", Some(version)));
    }
    assert_eq!(ws.read(ArtifactKind::Diff, "patient", None), "# Patient changes");
    // two summaries and one diff
    assert_eq!(generator.call_count(), 3);
    // two pages per version
    assert_eq!(fetcher.requests().len(), 4);
    assert!(fetcher
        .requests()
        .contains(&"https://hl7.org/fhir/R4/patient-definitions.html".to_string()));
}

#[tokio::test]
async fn second_ensure_does_not_regenerate() {
    let ws = Workspace::new();
    let generator = Arc::new(MockGenerator::default());
    let identity = Identity::new("Goal");

    let first = ws
        .pipeline(generator.clone(), Arc::new(spec_fetcher()), ProfileCorpus::new())
        .ensure(StageKind::Diff, &identity)
        .await
        .unwrap();
    let calls = generator.call_count();

    // a fresh pipeline sees only what is on disk
    let second = ws
        .pipeline(generator.clone(), Arc::new(spec_fetcher()), ProfileCorpus::new())
        .ensure(StageKind::Diff, &identity)
        .await
        .unwrap();

    assert!(second.cache_hit);
    assert_eq!(generator.call_count(), calls);
    assert_eq!(first.artifacts[0].path, second.artifacts[0].path);
}

#[tokio::test]
async fn repeated_ensure_in_one_run_is_memoized() {
    let ws = Workspace::new();
    let generator = Arc::new(MockGenerator::default());
    let pipeline = ws.pipeline(generator.clone(), Arc::new(spec_fetcher()), ProfileCorpus::new());
    let identity = Identity::new("Condition");

    let first = pipeline.ensure(StageKind::Summarize, &identity).await.unwrap();
    let second = pipeline.ensure(StageKind::Summarize, &Identity::new("CONDITION")).await.unwrap();

    assert_eq!(generator.call_count(), 2);
    assert_eq!(first.artifacts, second.artifacts);
    assert_eq!(pipeline.counters()[&StageKind::Summarize].succeeded, 1);
}

#[tokio::test]
async fn empty_existing_artifact_is_a_cache_hit() {
    let ws = Workspace::new();
    ws.seed(ArtifactKind::Diff, "Encounter", None, "");
    let generator = Arc::new(MockGenerator::default());
    let fetcher = Arc::new(spec_fetcher());
    let pipeline = ws.pipeline(generator.clone(), fetcher.clone(), ProfileCorpus::new());

    let out = pipeline
        .ensure(StageKind::Diff, &Identity::new("Encounter"))
        .await
        .unwrap();

    assert!(out.cache_hit);
    assert_eq!(generator.call_count(), 0);
    assert!(fetcher.requests().is_empty());
    assert!(!ws.exists(ArtifactKind::Summary, "encounter", Some("r4")));
}

#[tokio::test]
async fn failed_dependency_blocks_generation() {
    let ws = Workspace::new();
    let generator = Arc::new(MockGenerator::default());
    // every fetch fails, so DocFetch fails for both versions
    let fetcher = Arc::new(MockFetcher::new().failing_on("https://"));
    let pipeline = ws.pipeline(generator.clone(), fetcher, ProfileCorpus::new());
    let identity = Identity::new("Device");

    let err = pipeline.ensure(StageKind::Diff, &identity).await.unwrap_err();

    match err {
        StageError::DependencyUnresolved { stage, identity, .. } => {
            assert_eq!(stage, StageKind::Summarize);
            assert_eq!(identity, Identity::new("device"));
        }
        other => panic!("expected DependencyUnresolved, got {:?}", other),
    }
    assert_eq!(generator.call_count(), 0);
    assert!(!ws.exists(ArtifactKind::Document, "device", Some("r4")));
    assert!(!ws.exists(ArtifactKind::Diff, "device", None));

    let summarize = pipeline.ensure(StageKind::Summarize, &identity).await.unwrap_err();
    assert!(matches!(
        summarize,
        StageError::DependencyUnresolved { stage: StageKind::DocFetch, .. }
    ));
}

#[tokio::test]
async fn one_failing_section_yields_placeholder() {
    let ws = Workspace::new();
    let fetcher = Arc::new(spec_fetcher().failing_on("-definitions.html"));
    let pipeline = ws.pipeline(Arc::new(MockGenerator::default()), fetcher, ProfileCorpus::new());

    pipeline
        .ensure(StageKind::DocFetch, &Identity::new("Specimen"))
        .await
        .unwrap();

    let page = ws.read(ArtifactKind::Document, "specimen", Some("r6"));
    assert!(page.contains("<title>FHIR R6/Build: Specimen</title>"));
    assert!(page.contains("<h1>Resource</h1>"));
    assert!(page.contains("Error fetching https://build.fhir.org/specimen-definitions.html"));
}

#[tokio::test]
async fn generation_failure_is_a_service_error() {
    let ws = Workspace::new();
    let generator = Arc::new(MockGenerator::default().failing_on("Medication"));
    let pipeline = ws.pipeline(generator, Arc::new(spec_fetcher()), ProfileCorpus::new());

    let err = pipeline
        .ensure(StageKind::Summarize, &Identity::new("Medication"))
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::Service(_)));
    assert!(!ws.exists(ArtifactKind::Summary, "medication", Some("r4")));
    assert_eq!(pipeline.counters()[&StageKind::Summarize].failed, 1);
    assert_eq!(pipeline.counters()[&StageKind::DocFetch].succeeded, 1);
}

#[tokio::test]
async fn failed_version_does_not_block_the_other_summary() {
    let ws = Workspace::new();
    let generator = Arc::new(MockGenerator::default().failing_on("(r4)"));
    let pipeline = ws.pipeline(generator.clone(), Arc::new(spec_fetcher()), ProfileCorpus::new());

    let err = pipeline
        .ensure(StageKind::Summarize, &Identity::new("Encounter"))
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::Service(_)));
    assert_eq!(generator.call_count(), 2);
    assert!(!ws.exists(ArtifactKind::Summary, "encounter", Some("r4")));
    assert_eq!(ws.read(ArtifactKind::Summary, "encounter", Some("r6")), "generated");
}

#[tokio::test]
async fn only_missing_summary_is_regenerated() {
    let ws = Workspace::new();
    for version in ["r4", "r6"] {
        ws.seed(ArtifactKind::Document, "Location", Some(version), "<p>doc</p>");
    }
    ws.seed(ArtifactKind::Summary, "Location", Some("r4"), "hand-written r4 summary");

    let generator = Arc::new(MockGenerator::with_response("generated r6 summary"));
    let fetcher = Arc::new(spec_fetcher());
    let pipeline = ws.pipeline(generator.clone(), fetcher.clone(), ProfileCorpus::new());

    let out = pipeline
        .ensure(StageKind::Summarize, &Identity::new("Location"))
        .await
        .unwrap();

    assert!(!out.cache_hit);
    assert_eq!(generator.call_count(), 1);
    assert!(fetcher.requests().is_empty());
    assert_eq!(
        ws.read(ArtifactKind::Summary, "location", Some("r4")),
        "hand-written r4 summary"
    );
    assert_eq!(
        ws.read(ArtifactKind::Summary, "location", Some("r6")),
        "generated r6 summary"
    );
    assert!(generator.prompts()[0][1].as_text().contains("FHIR R6/Build"));
}

#[tokio::test]
async fn batch_isolates_failing_identity() {
    let ws = Workspace::new().with_config(|c| c.with_concurrency(2));
    let generator = Arc::new(MockGenerator::default());
    let fetcher = Arc::new(spec_fetcher().failing_on("/goal"));
    let pipeline = ws.pipeline(generator.clone(), fetcher, ProfileCorpus::new());

    let identities: Vec<Identity> = ["Patient", "Goal", "Procedure", "Coverage", "CareTeam"]
        .into_iter()
        .map(Identity::new)
        .collect();
    let summary = pipeline.run_all(&identities, StageKind::Diff).await;

    assert_eq!(summary.successes(), 4);
    assert_eq!(summary.failures(), 1);
    assert_eq!(summary.outcomes.len(), 5);
    assert_eq!(summary.outcomes[1].identity, Identity::new("Goal"));
    assert!(matches!(
        summary.outcomes[1].outcome,
        Outcome::Failed { kind: "dependency_unresolved", .. }
    ));

    for name in ["patient", "procedure", "coverage", "careteam"] {
        assert!(ws.exists(ArtifactKind::Diff, name, None));
    }
    assert!(!ws.exists(ArtifactKind::Diff, "goal", None));
    assert_eq!(generator.call_count(), 12);
    assert_eq!(summary.stage_counters[&StageKind::Diff].succeeded, 4);
    assert_eq!(summary.stage_counters[&StageKind::DocFetch].failed, 1);
}

#[tokio::test]
async fn run_one_reports_success() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline(
        Arc::new(MockGenerator::default()),
        Arc::new(MockFetcher::new().failing_on("https://")),
        ProfileCorpus::new(),
    );

    assert!(!pipeline.run_one(&Identity::new("Organization"), StageKind::DocFetch).await);

    ws.seed(ArtifactKind::Diff, "Practitioner", None, "done");
    assert!(pipeline.run_one(&Identity::new("Practitioner"), StageKind::Diff).await);
}

#[tokio::test]
async fn document_batch_runs_without_a_generator() {
    let ws = Workspace::new();
    let fetcher = Arc::new(spec_fetcher());
    let pipeline = ws.pipeline(Arc::new(UnavailableGenerator), fetcher.clone(), ProfileCorpus::new());

    let identities: Vec<Identity> = ws.config.resource_names.iter().take(3).map(Identity::new).collect();
    let summary = pipeline.run_all(&identities, StageKind::DocFetch).await;

    assert!(summary.is_success());
    assert_eq!(summary.successes(), 3);
    assert_eq!(fetcher.requests().len(), 12);
    for identity in &identities {
        for version in ["r4", "r6"] {
            assert!(ws.exists(ArtifactKind::Document, &identity.path_key(), Some(version)));
        }
    }
}

#[tokio::test]
async fn traversal_names_are_rejected_before_fetching() {
    let ws = Workspace::new();
    let fetcher = Arc::new(spec_fetcher());
    let pipeline = ws.pipeline(Arc::new(UnavailableGenerator), fetcher.clone(), ProfileCorpus::new());

    for name in ["../../escape", "nested/name", "back\\slash"] {
        let err = pipeline
            .ensure(StageKind::DocFetch, &Identity::new(name))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::NotFound(_)), "{}: {:?}", name, err);
    }
    assert!(fetcher.requests().is_empty());
    assert!(!ws.root().join("escape.html").exists());
}
