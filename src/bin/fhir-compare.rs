//! fhir-compare CLI: cached FHIR R4/R6 comparison and US Core migration reports.
//!
//! Usage:
//!   fhir-compare doc <Resource>
//!   fhir-compare fetch-docs
//!   fhir-compare summarize <Resource>
//!   fhir-compare diff <Resource>
//!   fhir-compare migrate [profile]
//!   fhir-compare sync-profiles
//!   fhir-compare run
//!
//! Generating commands need GEMINI_API_KEY (and optionally GEMINI_MODEL).
//! `doc`, `fetch-docs` and `sync-profiles` run without credentials.

use clap::{Parser, Subcommand};
use fhir_compare::{
    ArtifactStore, Comparison, GeminiClient, GeminiConfig, HttpFetcher, Identity, Pipeline,
    PipelineConfig, ProfileCorpus, ProfileSync, RunSummary, StageContext, StageKind,
    TextGenerator, UnavailableGenerator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fhir-compare",
    version,
    about = "Cached FHIR R4/R6 comparison and US Core migration reports"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Root directory for all artifacts (overrides the config file).
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Identities processed at once in batch commands.
    #[arg(long, global = true)]
    concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the documentation pages of a resource for both versions.
    Doc {
        /// Resource name, e.g. Patient.
        resource: String,
    },
    /// Fetch the documentation pages of every configured resource.
    FetchDocs,
    /// Summarize a resource's documentation for both versions.
    Summarize {
        /// Resource name, e.g. Patient.
        resource: String,
    },
    /// Analyze the differences of a resource between versions.
    Diff {
        /// Resource name, e.g. Patient.
        resource: String,
    },
    /// Analyze the migration impact on one profile, or on every profile.
    Migrate {
        /// Profile id or definition file stem, e.g. StructureDefinition-us-core-bmi.
        profile: Option<String>,
    },
    /// Download profile definitions and pages from the implementation guide.
    SyncProfiles,
    /// Sync profiles, diff every resource, then analyze every profile.
    Run,
}

fn load_config(cli: &Cli) -> Result<PipelineConfig, String> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_yaml_file(path).map_err(|e| e.to_string())?,
        None => PipelineConfig::default(),
    };
    if let Some(root) = &cli.root {
        config = config.with_root(root);
    }
    if let Some(limit) = cli.concurrency {
        config = config.with_concurrency(limit);
    }
    Ok(config)
}

fn gemini() -> Result<Arc<dyn TextGenerator>, String> {
    let config = GeminiConfig::from_env().map_err(|e| e.to_string())?;
    tracing::info!(model = %config.model, "using generation model");
    Ok(Arc::new(GeminiClient::new(config)))
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{}: {} succeeded, {} failed ({} ms, run {})",
        summary.stage,
        summary.successes(),
        summary.failures(),
        summary.duration().num_milliseconds(),
        summary.run_id
    );
    for failed in summary.failed() {
        if let fhir_compare::Outcome::Failed { kind, error } = &failed.outcome {
            println!("  {} [{}]: {}", failed.identity, kind, error);
        }
    }
}

fn http_pipeline(
    config: PipelineConfig,
    generator: Arc<dyn TextGenerator>,
    corpus: Arc<ProfileCorpus>,
) -> Result<Pipeline, String> {
    let context = StageContext::new(
        Arc::new(config),
        generator,
        Arc::new(HttpFetcher::new()),
        corpus,
    )
    .map_err(|e| e.to_string())?;
    Pipeline::standard(context).map_err(|e| e.to_string())
}

async fn cmd_stage(
    config: PipelineConfig,
    generator: Arc<dyn TextGenerator>,
    resource: &str,
    stage: StageKind,
) -> i32 {
    let pipeline = match http_pipeline(config, generator, Arc::new(ProfileCorpus::new())) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let identity = Identity::new(resource);
    match pipeline.ensure(stage, &identity).await {
        Ok(out) => {
            for artifact in &out.artifacts {
                println!("{}", artifact.path.display());
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {} failed for {}: {}", stage, identity, e);
            1
        }
    }
}

async fn cmd_migrate(
    config: PipelineConfig,
    generator: Arc<dyn TextGenerator>,
    profile: Option<&str>,
) -> i32 {
    let store = ArtifactStore::new(&config);
    let corpus = match ProfileCorpus::load_dir(&store.profile_json_dir()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let pipeline = match http_pipeline(config, generator, corpus.clone()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    match profile {
        Some(selector) => {
            let Some(node) = corpus.find(selector) else {
                eprintln!("Error: no loaded profile matches '{}'", selector);
                return 1;
            };
            let ok = pipeline
                .run_one(&node.identity, StageKind::MigrationAnalysis)
                .await;
            if ok {
                0
            } else {
                1
            }
        }
        None => {
            let summary = pipeline
                .run_all(&corpus.identities(), StageKind::MigrationAnalysis)
                .await;
            print_summary(&summary);
            if summary.is_success() {
                0
            } else {
                1
            }
        }
    }
}

async fn cmd_fetch_docs(config: PipelineConfig, generator: Arc<dyn TextGenerator>) -> i32 {
    let resources: Vec<Identity> = config.resource_names.iter().map(Identity::new).collect();
    let pipeline = match http_pipeline(config, generator, Arc::new(ProfileCorpus::new())) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let summary = pipeline.run_all(&resources, StageKind::DocFetch).await;
    print_summary(&summary);
    if summary.is_success() {
        0
    } else {
        1
    }
}

async fn cmd_sync(config: PipelineConfig) -> i32 {
    let store = Arc::new(ArtifactStore::new(&config));
    let sync = ProfileSync::new(&config, store, Arc::new(HttpFetcher::new()));
    match sync.run().await {
        Ok(report) => {
            println!(
                "Profiles: {} fetched, {} already present, {} failed",
                report.fetched.len(),
                report.skipped.len(),
                report.failures.len()
            );
            for (identity, reason) in &report.failures {
                println!("  {}: {}", identity, reason);
            }
            if report.is_success() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_run(config: PipelineConfig, generator: Arc<dyn TextGenerator>) -> i32 {
    let comparison = Comparison::new(Arc::new(config), generator, Arc::new(HttpFetcher::new()));
    match comparison.run().await {
        Ok(report) => {
            print_summary(&report.diff);
            if let Some(migration) = &report.migration {
                print_summary(migration);
            }
            if report.is_success() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // fetching and syncing never generate text
    let generator = match &cli.command {
        Commands::Doc { .. } | Commands::FetchDocs | Commands::SyncProfiles => {
            Ok(Arc::new(UnavailableGenerator) as Arc<dyn TextGenerator>)
        }
        _ => gemini(),
    };
    let generator = match generator {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match &cli.command {
        Commands::Doc { resource } => cmd_stage(config, generator, resource, StageKind::DocFetch).await,
        Commands::FetchDocs => cmd_fetch_docs(config, generator).await,
        Commands::Summarize { resource } => {
            cmd_stage(config, generator, resource, StageKind::Summarize).await
        }
        Commands::Diff { resource } => cmd_stage(config, generator, resource, StageKind::Diff).await,
        Commands::Migrate { profile } => cmd_migrate(config, generator, profile.as_deref()).await,
        Commands::SyncProfiles => cmd_sync(config).await,
        Commands::Run => cmd_run(config, generator).await,
    };
    std::process::exit(code);
}
