//! CLI command definitions, routing, and tracing setup.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use breachwatch_core::pipeline::{ProgressReporter, RunReport, parse_identifier_list, run_daily};
use breachwatch_core::reconcile::{ReconcileReport, reconcile};
use breachwatch_core::store::FindingStore;
use breachwatch_shared::{AppConfig, init_config, load_config};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// BreachWatch: daily breach-intelligence check for emails and addresses.
#[derive(Parser)]
#[command(
    name = "breachwatch",
    version,
    about = "Check identifiers against a breach source, record findings, and flag inventory records.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Append logs to this file instead of stderr. Overrides `[logging] file`.
    #[arg(long, global = true, env = "BREACHWATCH_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, PartialEq, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Bootstrap the stores, then check every identifier.
    Run {
        /// Email addresses or IP addresses to check.
        identifiers: Vec<String>,

        /// Read identifiers from a file, one per line (`#` starts a comment).
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Exit non-zero if any lookup failed after retries.
        #[arg(long)]
        strict: bool,
    },

    /// Create the findings table and search index if missing.
    Init,

    /// Compare the relational log with the search index.
    Reconcile {
        /// Re-index log rows missing from the search index.
        #[arg(long)]
        repair: bool,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Create default config file at ~/.breachwatch/breachwatch.toml.
    Init,
    /// Display current config (with env overrides applied).
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags and the `[logging]` config section.
pub(crate) fn init_tracing(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "breachwatch=info",
        1 => "breachwatch=debug",
        _ => "breachwatch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // A broken config file is reported by the command itself, not here.
    let log_file = cli.log_file.clone().or_else(|| {
        load_config()
            .ok()
            .and_then(|config| config.logging.file.map(PathBuf::from))
    });

    match (&cli.log_format, log_file) {
        (LogFormat::Text, None) => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        (LogFormat::Json, None) => {
            fmt().json().with_env_filter(env_filter).init();
        }
        (LogFormat::Text, Some(path)) => {
            let writer = Mutex::new(open_log_file(&path)?);
            fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
        }
        (LogFormat::Json, Some(path)) => {
            let writer = Mutex::new(open_log_file(&path)?);
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .init();
        }
    }

    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("cannot create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("cannot open log file {}", path.display()))
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            identifiers,
            file,
            strict,
        } => cmd_run(identifiers, file.as_deref(), strict).await,
        Command::Init => cmd_init().await,
        Command::Reconcile { repair } => cmd_reconcile(repair).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(identifiers: Vec<String>, file: Option<&Path>, strict: bool) -> Result<()> {
    let config = load_config()?;
    // Fail before any network traffic if a key is missing.
    let credentials = config.credentials()?;

    let identifiers = collect_identifiers(identifiers, file)?;
    if identifiers.is_empty() {
        return Err(eyre!("no identifiers given: pass them as arguments or with --file"));
    }

    info!(count = identifiers.len(), "identifiers loaded");

    let reporter = CliProgress::new();
    let report = run_daily(&config, &credentials, &identifiers, &reporter).await?;

    print_run_summary(&report);
    check_strict(&report, strict)
}

/// Merge positional identifiers with those read from `file`, keeping order.
fn collect_identifiers(mut identifiers: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("cannot read identifier file {}", path.display()))?;
        identifiers.extend(parse_identifier_list(&text));
    }
    Ok(identifiers)
}

fn check_strict(report: &RunReport, strict: bool) -> Result<()> {
    if strict && !report.lookup_failures.is_empty() {
        return Err(eyre!(
            "{} lookup(s) failed: {}",
            report.lookup_failures.len(),
            report.lookup_failures.join(", ")
        ));
    }
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    println!();
    println!("  Breach check complete");
    println!("  Checked:    {}", report.checked);
    println!("  Found:      {}", report.found);
    println!("  Clean:      {}", report.clean);
    if report.skipped > 0 {
        println!("  Skipped:    {}", report.skipped);
    }
    println!(
        "  Stored:     {} row(s), {} document(s)",
        report.rows_written, report.documents_written
    );
    println!("  Annotated:  {}", report.annotations_updated.len());
    for (address, record_id) in &report.annotations_updated {
        println!("    {address} -> record {record_id}");
    }
    if !report.annotations_not_found.is_empty() {
        println!(
            "  Not in inventory: {}",
            report.annotations_not_found.join(", ")
        );
    }
    print_failures("Lookup failed", &report.lookup_failures);
    print_failures("Store failed", &report.persist_failures);
    print_failures("Annotate failed", &report.annotation_failures);
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

fn print_failures(label: &str, identifiers: &[String]) {
    if !identifiers.is_empty() {
        println!("  {label}: {}", identifiers.join(", "));
    }
}

async fn cmd_init() -> Result<()> {
    let config = load_config()?;
    let store = FindingStore::connect(&config, &config.store_credentials()?).await?;
    store.ensure_ready().await?;

    println!("Findings table ready at: {}", database_location(&config));
    println!(
        "Search index ready: {}/{}",
        config.search.url.trim_end_matches('/'),
        store.index().index_name()
    );
    Ok(())
}

fn database_location(config: &AppConfig) -> &str {
    config.database.url.as_deref().unwrap_or(&config.database.path)
}

async fn cmd_reconcile(repair: bool) -> Result<()> {
    let config = load_config()?;
    let store = FindingStore::connect(&config, &config.store_credentials()?).await?;

    let report = reconcile(&store, repair).await?;
    print_reconcile_summary(&report, repair);

    if !report.errors.is_empty() {
        return Err(eyre!("{} identifier(s) could not be reconciled", report.errors.len()));
    }
    Ok(())
}

fn print_reconcile_summary(report: &ReconcileReport, repair: bool) {
    println!();
    println!("  Identifiers compared: {}", report.checked);
    println!("  Divergent:            {}", report.divergent.len());
    for d in &report.divergent {
        println!(
            "    {}: {} row(s), {} document(s){}",
            d.query,
            d.log_rows,
            d.index_docs,
            if d.repaired > 0 {
                format!(", {} re-indexed", d.repaired)
            } else {
                String::new()
            }
        );
    }
    if repair {
        println!("  Re-indexed:           {}", report.repaired());
    } else if report.divergent.iter().any(|d| d.missing_from_index() > 0) {
        println!("  Run with --repair to re-index missing rows.");
    }
    for (query, error) in &report.errors {
        println!("  Error for {query}: {error}");
    }
    println!();
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
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
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn identifier_started(&self, identifier: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Checking [{current}/{total}] {identifier}"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        // A failed run never reaches `done`.
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}
