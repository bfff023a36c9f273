//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use taxdesk_core::pipeline::{ProgressReporter, QueryPipeline, ScanOutcome, run_scan};
use taxdesk_core::{DocumentClassifier, OpenRouterClient, classify_question, plan_partitions};
use taxdesk_crawler::{HttpFetcher, PortalWatcher, enrich, fingerprint};
use taxdesk_shared::{
    AppConfig, CatalogConfig, CatalogStore, DiscoveredDocument, PortalType, RetrievalOptions,
    init_config, load_config, load_config_from,
};
use taxdesk_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// TaxDesk: route tax-compliance questions and watch fiscal portals.
#[derive(Parser)]
#[command(
    name = "taxdesk",
    version,
    about = "Route Brazilian tax-compliance questions to knowledge partitions and track fiscal portal updates.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.taxdesk/taxdesk.toml).
    #[arg(long, global = true, env = "TAXDESK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
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

/// Portal jurisdiction accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum PortalTypeArg {
    Nacional,
    Estadual,
}

impl From<PortalTypeArg> for PortalType {
    fn from(arg: PortalTypeArg) -> Self {
        match arg {
            PortalTypeArg::Nacional => PortalType::National,
            PortalTypeArg::Estadual => PortalType::State,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Classify a question and print its intent.
    Triage {
        question: String,
    },

    /// Show the partitions a question would be routed to.
    Plan {
        question: String,
    },

    /// Route a question and print the retrieved context.
    Ask {
        question: String,

        /// Retrieval budget in milliseconds (overrides config).
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the full query context as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Scan every portal, classify fresh documents and record them.
    Scan {
        /// Classify with heuristics only.
        #[arg(long)]
        no_llm: bool,
    },

    /// Classify an ad-hoc document.
    Classify {
        #[arg(long)]
        title: String,

        #[arg(long)]
        url: String,

        #[arg(long, value_enum, default_value = "nacional")]
        portal_type: PortalTypeArg,

        /// Classify with heuristics only.
        #[arg(long)]
        no_llm: bool,
    },

    /// List knowledge partitions.
    Partitions,

    /// List watched portals.
    Portals,

    /// List recorded documents.
    Documents {
        /// Only documents of this partition.
        #[arg(long)]
        partition: Option<String>,

        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show the scan history.
    Runs {
        #[arg(long, default_value = "10")]
        limit: u32,
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
        0 => "taxdesk=info",
        1 => "taxdesk=debug",
        _ => "taxdesk=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    let command = match cli.command {
        Command::Config { action } => {
            return match action {
                ConfigAction::Init => cmd_config_init(),
                ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
            };
        }
        command => command,
    };

    let config = resolve_config(cli.config.as_deref())?;
    let catalog = Arc::new(open_catalog(&config.catalog)?);

    match command {
        Command::Triage { question } => cmd_triage(&question),
        Command::Plan { question } => cmd_plan(&question, &catalog),
        Command::Ask {
            question,
            timeout_ms,
            json,
        } => cmd_ask(&config, catalog, &question, timeout_ms, json).await,
        Command::Scan { no_llm } => cmd_scan(&config, catalog, no_llm).await,
        Command::Classify {
            title,
            url,
            portal_type,
            no_llm,
        } => cmd_classify(&config, catalog, &title, &url, portal_type.into(), no_llm).await,
        Command::Partitions => cmd_partitions(&catalog),
        Command::Portals => cmd_portals(&catalog),
        Command::Documents { partition, limit } => {
            cmd_documents(&config, partition.as_deref(), limit).await
        }
        Command::Runs { limit } => cmd_runs(&config, limit).await,
        Command::Config { .. } => unreachable!("handled above"),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Catalogs from the configured files. Missing default files fall back to
/// the built-in catalogs; a missing custom path is an error.
fn open_catalog(config: &CatalogConfig) -> Result<CatalogStore> {
    let defaults = CatalogConfig::default();
    let portals = Path::new(&config.portals_path);
    let partitions = Path::new(&config.partitions_path);

    if !portals.exists()
        && !partitions.exists()
        && config.portals_path == defaults.portals_path
        && config.partitions_path == defaults.partitions_path
    {
        info!("catalog files not found, using built-in catalogs");
        return Ok(CatalogStore::builtin()?);
    }

    CatalogStore::open(portals, partitions).wrap_err("failed to load catalogs")
}

async fn open_storage(config: &AppConfig, readonly: bool) -> Result<Storage> {
    let path = PathBuf::from(&config.storage.db_path);
    let storage = if readonly && path.exists() {
        Storage::open_readonly(&path).await?
    } else {
        Storage::open(&path).await?
    };
    Ok(storage)
}

fn classifier_for(
    config: &AppConfig,
    catalog: Arc<CatalogStore>,
    no_llm: bool,
) -> Result<DocumentClassifier> {
    if no_llm {
        return Ok(DocumentClassifier::heuristic_only(catalog));
    }
    let client = OpenRouterClient::from_config(config)
        .wrap_err("LLM classification needs an API key (or pass --no-llm)")?;
    info!(model = client.model(), "using OpenRouter for classification");
    Ok(DocumentClassifier::new(catalog, Some(Arc::new(client))))
}

// ---------------------------------------------------------------------------
// Question commands
// ---------------------------------------------------------------------------

fn cmd_triage(question: &str) -> Result<()> {
    let intent = classify_question(question);
    println!("{}", serde_json::to_string_pretty(&intent)?);
    Ok(())
}

fn cmd_plan(question: &str, catalog: &CatalogStore) -> Result<()> {
    let intent = classify_question(question);
    let plan = plan_partitions(&intent, catalog);
    let out = serde_json::json!({ "intent": intent, "partitions": plan });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn cmd_ask(
    config: &AppConfig,
    catalog: Arc<CatalogStore>,
    question: &str,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let storage = Arc::new(open_storage(config, true).await?);
    let mut options = RetrievalOptions::from(config);
    if let Some(ms) = timeout_ms {
        options.timeout = Duration::from_millis(ms);
    }

    let ctx = QueryPipeline::new(catalog, storage, options)
        .run(question)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&ctx)?);
        return Ok(());
    }

    println!("Trail:      {}", ctx.intent.trail);
    println!("Partitions: {}", ctx.outcome.partitions_queried.join(", "));
    if ctx.outcome.timed_out {
        println!("Retrieval budget exhausted; partial results.");
    }
    for (partition, error) in &ctx.outcome.errors {
        println!("Error in {partition}: {error}");
    }
    println!();
    if ctx.context.is_empty() {
        println!("(no context found)");
    } else {
        println!("{}", ctx.context);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Document commands
// ---------------------------------------------------------------------------

async fn cmd_scan(config: &AppConfig, catalog: Arc<CatalogStore>, no_llm: bool) -> Result<()> {
    let classifier = classifier_for(config, Arc::clone(&catalog), no_llm)?;
    let storage = Arc::new(open_storage(config, false).await?);
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    let watcher = PortalWatcher::new(Arc::clone(&catalog), fetcher, storage.clone());

    info!(portals = catalog.list_portals().len(), no_llm, "starting scan");

    let reporter = CliProgress::new();
    let outcome = run_scan(&watcher, &classifier, storage.as_ref(), &reporter).await?;
    let report = &outcome.report;

    println!();
    println!("  Scan complete");
    println!("  Run:      {}", report.run_id);
    println!("  Portals:  {} scanned, {} failed", report.portals_scanned, report.portals_failed.len());
    println!("  Parsed:   {}", report.parsed_total);
    println!("  Fresh:    {}", outcome.classified.len());
    println!("  Recorded: {} new, {} failed", outcome.recorded_new, outcome.record_failed);
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    for (portal, error) in &report.portals_failed {
        println!("  ! {portal}: {error}");
    }
    if !outcome.classified.is_empty() {
        println!();
        for item in &outcome.classified {
            println!(
                "  [{}] {} ({})",
                item.classification.partition_id,
                item.document.title,
                item.classification.strategy.as_str()
            );
        }
    }
    println!();

    Ok(())
}

async fn cmd_classify(
    config: &AppConfig,
    catalog: Arc<CatalogStore>,
    title: &str,
    url: &str,
    portal_type: PortalType,
    no_llm: bool,
) -> Result<()> {
    url::Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;

    let classifier = classifier_for(config, catalog, no_llm)?;
    let mut document = DiscoveredDocument::new("adhoc", portal_type, title, url);
    document.content_hash = fingerprint("adhoc", url, title);
    enrich(&mut document);

    let result = classifier.classify(&document).await;
    let out = serde_json::json!({ "document": document, "classification": result });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn cmd_documents(config: &AppConfig, partition: Option<&str>, limit: u32) -> Result<()> {
    let storage = open_storage(config, true).await?;

    let counts = storage.count_documents_by_partition().await?;
    if counts.is_empty() {
        println!("No documents recorded yet. Run `taxdesk scan` first.");
        return Ok(());
    }
    for (id, count) in &counts {
        println!("{id:<28} {count}");
    }
    println!();

    for doc in storage.list_documents(partition, limit).await? {
        println!(
            "{}  {:<24} {}\n    {}",
            doc.detected_at.format("%Y-%m-%d"),
            doc.partition_id,
            doc.title,
            doc.url
        );
    }
    Ok(())
}

async fn cmd_runs(config: &AppConfig, limit: u32) -> Result<()> {
    let storage = open_storage(config, true).await?;
    let runs = storage.list_scan_runs(limit).await?;
    if runs.is_empty() {
        println!("No scan runs recorded.");
        return Ok(());
    }
    for run in runs {
        let finished = run
            .finished_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unfinished".into());
        println!(
            "{}  {}  {}  {}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            finished,
            run.stats_json.as_deref().unwrap_or("{}")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Catalog commands
// ---------------------------------------------------------------------------

fn cmd_partitions(catalog: &CatalogStore) -> Result<()> {
    for p in catalog.list_partitions() {
        println!("{:<24} {}", p.id, p.description);
    }
    Ok(())
}

fn cmd_portals(catalog: &CatalogStore) -> Result<()> {
    for p in catalog.list_portals() {
        println!(
            "{:<20} {:<9} {}{}",
            p.id,
            p.portal_type.as_str(),
            p.base_url.trim_end_matches('/'),
            p.listing_path
        );
    }
    Ok(())
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
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn document_classified(&self, title: &str, partition_id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Classifying [{current}/{total}] {title} -> {partition_id}"));
    }

    fn done(&self, _outcome: &ScanOutcome) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    if let Err(e) = taxdesk_shared::validate_api_key(&config) {
        warn!("{e}");
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
