use anyhow::Context;
use bill_triage::classify::ChatClassifier;
use bill_triage::normalizer::{self, parse_bills, SourceIndex};
use bill_triage::prelude::*;
use bill_triage::publish;
use bill_triage::HookRegistry;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Two-pass legislative bill triage
#[derive(Parser, Debug)]
#[command(name = "bill-triage")]
#[command(about = "Filter and analyze legislative bills with cached enrichment hooks")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect the format of filter-result files and print normalized candidates
    Inspect {
        /// Filter-result documents; candidates are deduplicated across files
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Raw source dataset used to backfill missing fields
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Run the filter pass over a raw bill dataset
    Filter {
        /// Pipeline YAML file (defaults apply when omitted)
        #[arg(long, env = "BILL_TRIAGE_CONFIG")]
        config: Option<PathBuf>,

        /// Raw bills: a JSON array or a LegiScan search result
        #[arg(long)]
        input: PathBuf,

        /// Where to write the filter-result document
        #[arg(long)]
        output: PathBuf,
    },

    /// Run the analysis pass over a filter-result document
    Analyze {
        #[arg(long, env = "BILL_TRIAGE_CONFIG")]
        config: Option<PathBuf>,

        /// Filter-result document in any supported format
        #[arg(long = "filter-results")]
        filter_results: PathBuf,

        /// Raw source dataset used to backfill missing fields
        #[arg(long)]
        source: Option<PathBuf>,

        /// Run id used in output file names (default: timestamp)
        #[arg(long = "run-id")]
        run_id: Option<String>,

        /// Analyze only the first N candidates
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn load_source(path: Option<&Path>) -> anyhow::Result<Option<SourceIndex>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let document = publish::read_document(path)
        .with_context(|| format!("Failed to read source dataset {}", path.display()))?;
    let index = SourceIndex::from_value(&document)?;
    info!("Loaded {} source bills from {}", index.len(), path.display());
    Ok(Some(index))
}

fn build_hooks(config: &PipelineConfig) -> anyhow::Result<Arc<HookManager>> {
    let store = HookManager::open_store(&config.hooks)?;
    let manager = HookManager::from_config(&config.hooks, &HookRegistry::with_builtin(), store)
        .context("Failed to resolve configured hooks")?;
    Ok(Arc::new(manager))
}

fn run_inspect(files: Vec<PathBuf>, source: Option<PathBuf>) -> anyhow::Result<()> {
    let source = load_source(source.as_deref())?;

    let mut documents = Vec::with_capacity(files.len());
    for path in &files {
        let document = publish::read_document(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let info = normalizer::format_info(&document)
            .with_context(|| format!("Unrecognized filter results in {}", path.display()))?;
        println!(
            "{}",
            serde_json::to_string(&serde_json::json!({
                "file": path.display().to_string(),
                "format": info,
            }))?
        );
        documents.push(document);
    }

    for candidate in normalizer::aggregate(&documents, source.as_ref())? {
        println!("{}", serde_json::to_string(&candidate)?);
    }
    Ok(())
}

async fn run_filter(config: Option<PathBuf>, input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let config = load_config(config.as_deref())?;
    let raw = publish::read_document(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let bills = parse_bills(&raw)?;
    info!("Loaded {} bills from {}", bills.len(), input.display());

    let classifier = Arc::new(ChatClassifier::from_env(config.classifier.clone())?);
    let pass = FilterPass::new(config.filter_pass.clone(), classifier, build_hooks(&config)?)
        .with_source(input.display().to_string());

    let outcome = pass.run(&bills).await;
    publish::write_filter_results(&output, &outcome)?;

    if !outcome.failed_batches.is_empty() {
        warn!(
            "{} batches failed; their bills are missing from {}",
            outcome.failed_batches.len(),
            output.display()
        );
    }
    Ok(())
}

async fn run_analyze(
    config: Option<PathBuf>,
    filter_results: PathBuf,
    source: Option<PathBuf>,
    run_id: Option<String>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let config = load_config(config.as_deref())?;
    let source = load_source(source.as_deref())?;

    let document = publish::read_document(&filter_results)
        .with_context(|| format!("Failed to read {}", filter_results.display()))?;
    let mut candidates = normalizer::normalize(&document, source.as_ref())
        .with_context(|| format!("Unrecognized filter results in {}", filter_results.display()))?;
    if let Some(limit) = limit {
        candidates.truncate(limit);
    }

    let classifier = Arc::new(ChatClassifier::from_env(config.classifier.clone())?);
    let pass = AnalysisPass::new(config.analysis_pass.clone(), classifier, build_hooks(&config)?);
    let report = pass.run(candidates).await;

    let run_id = run_id.unwrap_or_else(|| publish::default_run_id(&report));
    publish::write_run(&config.output.directory, &run_id, &report)?;

    for errored in &report.errored {
        warn!(
            "{} errored while {}: {}",
            errored.identifier, errored.stage, errored.message
        );
    }
    println!("{}", serde_json::to_string_pretty(&report.summary())?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bill_triage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Inspect { files, source } => run_inspect(files, source),
        Command::Filter {
            config,
            input,
            output,
        } => run_filter(config, input, output).await,
        Command::Analyze {
            config,
            filter_results,
            source,
            run_id,
            limit,
        } => run_analyze(config, filter_results, source, run_id, limit).await,
    }
}
