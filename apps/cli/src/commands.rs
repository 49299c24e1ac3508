//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use floracrawl_core::{run_crawl, source_status};
use floracrawl_crawler::CrawlProgress;
use floracrawl_shared::{
    AppConfig, CrawlConfig, TaxonRank, config_file_path, init_config, load_config, select_source,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// FloraCrawl — taxonomy sites into resumable record streams.
#[derive(Parser)]
#[command(
    name = "floracrawl",
    version,
    about = "Crawl hierarchical botanical taxonomy sites into append-only JSONL record streams.",
    long_about = None,
)]
pub(crate) struct Cli {
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
    /// Run (or resume) a crawl for a configured source.
    Crawl {
        /// Source name from the config (defaults to the first entry).
        #[arg(short, long)]
        source: Option<String>,

        /// Output root directory (defaults to the configured output_dir).
        #[arg(short, long)]
        out: Option<String>,

        /// Deepest rank to fetch: order, family, genus, species, subspecies.
        #[arg(long)]
        leaf_rank: Option<String>,

        /// Cap on concurrent page fetches across all nested pools.
        #[arg(long)]
        max_in_flight: Option<usize>,
    },

    /// Show per-rank completion progress for a source.
    Status {
        /// Source name from the config (defaults to the first entry).
        #[arg(short, long)]
        source: Option<String>,

        /// Output root directory (defaults to the configured output_dir).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// List configured taxonomy sources.
    Sources,

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
        0 => "floracrawl=info",
        1 => "floracrawl=debug",
        _ => "floracrawl=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Crawl {
            source,
            out,
            leaf_rank,
            max_in_flight,
        } => {
            cmd_crawl(
                source.as_deref(),
                out.as_deref(),
                leaf_rank.as_deref(),
                max_in_flight,
            )
            .await
        }
        Command::Status { source, out } => cmd_status(source.as_deref(), out.as_deref()).await,
        Command::Sources => cmd_sources().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Merge config file + CLI flags into the runtime crawl config.
fn resolve_crawl_config(
    config: &AppConfig,
    source: Option<&str>,
    out: Option<&str>,
    leaf_rank: Option<&str>,
    max_in_flight: Option<usize>,
) -> Result<CrawlConfig> {
    let source = select_source(config, source)?.clone();
    let mut crawl = CrawlConfig::for_source(config, &source)?;

    if let Some(out) = out {
        crawl.output_root = PathBuf::from(out);
    }
    if let Some(rank) = leaf_rank {
        crawl.leaf_rank = rank.parse::<TaxonRank>()?;
    }
    if let Some(cap) = max_in_flight {
        crawl.max_in_flight = cap.max(1);
    }
    Ok(crawl)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_crawl(
    source: Option<&str>,
    out: Option<&str>,
    leaf_rank: Option<&str>,
    max_in_flight: Option<usize>,
) -> Result<()> {
    let config = load_config()?;
    let crawl = resolve_crawl_config(&config, source, out, leaf_rank, max_in_flight)?;

    info!(
        source = %crawl.source.name,
        leaf_rank = %crawl.leaf_rank,
        "starting crawl"
    );

    let progress = Arc::new(CliProgress::new());
    let report = run_crawl(&crawl, progress.clone()).await?;
    progress.finish();

    println!();
    println!("  Crawl run {} finished", report.run_id);
    println!("  Pages fetched:    {}", report.summary.pages_fetched);
    println!("  Pages failed:     {}", report.summary.pages_failed);
    println!("  Subtrees skipped: {}", report.summary.subtrees_skipped);
    println!("  Completed now:");
    for rank in TaxonRank::ALL {
        if let Some(count) = report.completed_by_rank.get(&rank) {
            println!("    {rank:<12} {count}");
        }
    }
    if report.summary.listings_unknown > 0 {
        println!(
            "  Enumerations unresolved: {} (those subtrees will be retried next run)",
            report.summary.listings_unknown
        );
    }
    println!("  Records: {}", report.records_path.display());
    println!("  Ledger:  {}", report.ledger_path.display());
    println!("  Time:    {:.1}s", report.summary.duration.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_status(source: Option<&str>, out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let crawl = resolve_crawl_config(&config, source, out, None, None)?;
    let status = source_status(&crawl).await?;

    println!();
    println!("  Source: {}", crawl.source.name);
    println!("  Completed identifiers:");
    for rank in TaxonRank::ALL {
        let count = status.completed_by_rank.get(&rank).copied().unwrap_or(0);
        println!("    {rank:<12} {count}");
    }
    println!("  Record lines: {}", status.record_lines);
    println!("  Records: {}", status.records_path.display());
    println!("  Ledger:  {}", status.ledger_path.display());
    println!();

    Ok(())
}

async fn cmd_sources() -> Result<()> {
    let config = load_config()?;

    if config.sources.is_empty() {
        println!("No sources configured. Run `floracrawl config init` to create defaults.");
        return Ok(());
    }

    println!();
    for source in &config.sources {
        println!("  {} ({})", source.name, source.slug());
        println!("    base:     {}", source.base_url);
        println!("    tree api: {}", source.tree_api_url);
    }
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Created config file at {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let path = config_file_path()?;
    println!("# resolved config ({})", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Crawl progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    fetched: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            fetched: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    fn counts(&self) -> (usize, usize, usize) {
        (
            self.fetched.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
        )
    }
}

impl CrawlProgress for CliProgress {
    fn level_started(&self, rank: TaxonRank, siblings: usize) {
        self.spinner
            .set_message(format!("fanning out over {siblings} {rank} taxa"));
    }

    fn page_fetched(&self, rank: TaxonRank, name: &str) {
        let fetched = self.fetched.fetch_add(1, Ordering::Relaxed) + 1;
        let (_, failed, skipped) = self.counts();
        self.spinner.set_message(format!(
            "{fetched} fetched, {failed} failed, {skipped} skipped — {rank}: {name}"
        ));
    }

    fn page_failed(&self, _rank: TaxonRank, _url: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn subtree_skipped(&self, _rank: TaxonRank, _identifier: &str) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }
}
