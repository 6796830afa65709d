//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use trendlyze_core::pipeline::{Pipeline, ProgressReporter, RunSummary, Services, Stage};
use trendlyze_core::{DuplicateTally, HttpFetcher, JsonFeedSource, SourceAdapter};
use trendlyze_llm::LlmClient;
use trendlyze_shared::{
    AppConfig, Record, RunId, init_config, load_config, load_config_from, validate_api_key,
};
use trendlyze_storage::{StageStore, open_store};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Trendlyze: news articles in, de-duplicated topic clusters out.
#[derive(Parser)]
#[command(
    name = "trendlyze",
    version,
    about = "Collect news articles, remove duplicates, and label topic clusters.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.trendlyze/trendlyze.toml).
    #[arg(long, global = true, env = "TRENDLYZE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start a new run over one or more source feeds.
    Run {
        /// JSON feed files exported by scrapers (one source per file).
        #[arg(long = "sources", required = true, num_args = 1..)]
        sources: Vec<PathBuf>,

        /// Download markup for articles that arrive without it.
        #[arg(long)]
        fetch: bool,
    },

    /// Re-run an existing run from a stage onward.
    Resume {
        /// Run id (YYYYMMDD/<id>).
        #[arg(long)]
        run: String,

        /// First stage to re-run: merge, dedup, analyze, semantic, clustered, or final.
        #[arg(long)]
        from: String,
    },

    /// Show the snapshots of a run.
    Inspect {
        /// Run id (YYYYMMDD/<id>).
        #[arg(long)]
        run: String,

        /// Stage snapshot to summarize (lists all snapshots when omitted).
        #[arg(long)]
        stage: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "trendlyze=info",
        1 => "trendlyze=debug",
        _ => "trendlyze=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { sources, fetch } => cmd_run(config_path, &sources, fetch).await,
        Command::Resume { run, from } => cmd_resume(config_path, &run, &from).await,
        Command::Inspect { run, stage } => cmd_inspect(config_path, &run, stage.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

/// Load the config file, apply environment overrides, and validate.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Build a pipeline wired to the configured store and LLM provider.
async fn build_pipeline(config: AppConfig, fetch: bool) -> Result<Pipeline> {
    let api_key = validate_api_key(&config)?;
    let client = Arc::new(LlmClient::new(&config.llm, api_key)?);
    let store = open_store(&config.storage).await?;
    let timeout_secs = config.llm.timeout_secs;

    let mut pipeline = Pipeline::new(config, store, Services::shared(client));
    if fetch {
        pipeline = pipeline.with_fetcher(Arc::new(HttpFetcher::new(timeout_secs)?));
    }
    Ok(pipeline)
}

fn parse_run(run: &str) -> Result<RunId> {
    run.parse::<RunId>().map_err(|e| eyre!("{e}"))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, feeds: &[PathBuf], fetch: bool) -> Result<()> {
    for feed in feeds {
        if !feed.is_file() {
            return Err(eyre!("source feed '{}' does not exist", feed.display()));
        }
    }

    let config = resolve_config(config_path)?;
    let pipeline = build_pipeline(config, fetch).await?;

    let sources: Vec<Box<dyn SourceAdapter>> = feeds
        .iter()
        .map(|path| Box::new(JsonFeedSource::new(path)) as Box<dyn SourceAdapter>)
        .collect();

    info!(sources = sources.len(), fetch, "starting run");
    let reporter = CliProgress::new();
    let summary = pipeline.run(&sources, &reporter).await?;

    print_summary("Run complete!", &summary);
    Ok(())
}

async fn cmd_resume(config_path: Option<&Path>, run: &str, from: &str) -> Result<()> {
    let run = parse_run(run)?;
    let from: Stage = from.parse()?;

    let config = resolve_config(config_path)?;
    let pipeline = build_pipeline(config, false).await?;

    info!(%run, %from, "resuming run");
    let reporter = CliProgress::new();
    let summary = pipeline.resume(&run, from, &reporter).await?;

    print_summary("Run resumed!", &summary);
    Ok(())
}

async fn cmd_inspect(config_path: Option<&Path>, run: &str, stage: Option<&str>) -> Result<()> {
    let run = parse_run(run)?;
    let config = resolve_config(config_path)?;
    let store = open_store(&config.storage).await?;

    match stage {
        None => {
            let names = store.list_documents(&run, "").await?;
            if names.is_empty() {
                return Err(eyre!("no snapshots found for run {run}"));
            }
            println!();
            println!("  Run {run}");
            for name in names {
                let count = snapshot_len(store.as_ref(), &run, &name).await;
                println!("  {name:<24} {count}");
            }
            println!();
        }
        Some(name) if name == Stage::Topics.snapshot() => {
            let topics = store.read_topics(&run, name).await?;
            println!();
            for topic in &topics {
                println!(
                    "  [{} #{}] {} ({} articles)",
                    topic.category,
                    topic.cluster_id,
                    topic.topic,
                    topic.articles.len()
                );
                if !topic.reason.is_empty() {
                    println!("      {}", topic.reason);
                }
            }
            let failed = topics.iter().filter(|t| t.is_error()).count();
            println!();
            println!("  Topics: {}  Failed: {failed}", topics.len());
            println!();
        }
        Some(name) => {
            let records = store.read_stage(&run, name).await?;
            print_stage(name, &records);
        }
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Item count of a snapshot, or `?` when it cannot be read.
async fn snapshot_len(store: &dyn StageStore, run: &RunId, name: &str) -> String {
    match store.get_document(run, name).await {
        Ok(Some(body)) => match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Array(items)) => items.len().to_string(),
            Ok(_) => "1".to_string(),
            Err(_) => "?".to_string(),
        },
        _ => "?".to_string(),
    }
}

fn print_stage(name: &str, records: &[Record]) {
    let tally = DuplicateTally::of(records);
    let with_content = records.iter().filter(|r| r.body().is_some()).count();
    let annotated = records.iter().filter(|r| r.analyze.is_some()).count();
    let failed = records
        .iter()
        .filter(|r| r.analyze_error.is_some() || r.embedding_error.is_some())
        .count();

    let mut clusters: BTreeMap<(&str, u32), usize> = BTreeMap::new();
    for record in records {
        if let (Some(category), Some(cluster)) = (record.cluster_category.as_deref(), record.cluster)
        {
            *clusters.entry((category, cluster)).or_default() += 1;
        }
    }

    println!();
    println!("  Stage:      {name}");
    println!("  Records:    {}", records.len());
    println!("  Content:    {with_content}");
    println!("  Annotated:  {annotated}");
    println!("  Errors:     {failed}");
    if tally.unlabeled < records.len() {
        println!(
            "  R/D/N:      {}/{}/{}",
            tally.representatives, tally.duplicates, tally.unique
        );
    }
    if !clusters.is_empty() {
        println!("  Clusters:");
        for ((category, cluster), size) in clusters {
            println!("    {category} #{cluster}: {size}");
        }
    }
    println!();
}

fn print_summary(title: &str, summary: &RunSummary) {
    println!();
    println!("  {title}");
    if let Some(run) = &summary.run {
        println!("  Run:        {run}");
    }
    println!("  Collected:  {}", summary.collected);
    println!("  Merged:     {}", summary.merged);
    println!("  Unique:     {}", summary.after_link_dedup);
    println!(
        "  Annotated:  {} ({} failed)",
        summary.annotated, summary.annotation_failures
    );
    if let Some(tally) = summary.duplicates {
        println!(
            "  R/D/N:      {}/{}/{}",
            tally.representatives, tally.duplicates, tally.unique
        );
    }
    println!("  Clustered:  {}", summary.clustered);
    println!(
        "  Topics:     {} ({} failed)",
        summary.topics, summary.topic_failures
    );
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid progress template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn source_collected(&self, name: &str, count: usize) {
        self.spinner
            .println(format!("  collected {count:>4} from {name}"));
    }

    fn stage_written(&self, stage: Stage, count: usize) {
        self.spinner
            .println(format!("  wrote     {count:>4} to {stage}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_several_sources() {
        let cli = Cli::try_parse_from([
            "trendlyze",
            "-v",
            "run",
            "--sources",
            "zdnet.json",
            "ditoday.json",
            "--fetch",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Run { sources, fetch } => {
                assert_eq!(sources.len(), 2);
                assert!(fetch);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_sources() {
        assert!(Cli::try_parse_from(["trendlyze", "run"]).is_err());
    }

    #[test]
    fn inspect_stage_is_optional() {
        let cli = Cli::try_parse_from([
            "trendlyze",
            "inspect",
            "--run",
            "20250528/0190a1b2c3d47e8f9a0b1c2d3e4f5a6b",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Inspect { stage: None, .. }));
    }
}
