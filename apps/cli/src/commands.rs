//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use brandlens_core::{PipelineController, ProgressReporter, StepOutput, get_artifact_summary};
use brandlens_models::ModelRouter;
use brandlens_shared::{
    AppConfig, BrandlensError, PipelineResult, RunId, StepRecord, expand_home, init_config,
    load_config, validate_api_keys, validate_config,
};
use brandlens_source::{ContentSource, FixtureSource, HttpSource};
use brandlens_storage::{ContentStore, FsContentStore, Storage};

/// File name of the run ledger inside the data directory.
const LEDGER_FILE: &str = "brandlens.db";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Brandlens: brand profile and competitor analysis from a single URL.
#[derive(Parser)]
#[command(
    name = "brandlens",
    version,
    about = "Analyze a brand's website into a brand profile and competitor analysis.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory (overrides `[defaults] data_dir`).
    #[arg(long, global = true, env = "BRANDLENS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Where page content comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum SourceMode {
    /// Fetch the live page.
    Http,
    /// Read a local mock page keyed by host.
    Fixture,
}

impl SourceMode {
    fn from_config(value: &str) -> Result<Self> {
        match value {
            "http" => Ok(Self::Http),
            "fixture" => Ok(Self::Fixture),
            other => Err(eyre!(
                "invalid [defaults] source `{other}`: expected `http` or `fixture`"
            )),
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline for a URL.
    Run {
        /// Brand website URL.
        url: String,

        /// Content source (defaults to `[defaults] source`).
        #[arg(long, value_enum)]
        source: Option<SourceMode>,

        /// Fixture directory for `--source fixture`.
        #[arg(long)]
        fixtures: Option<PathBuf>,

        /// Print the result as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Show the acquisition summary of a run.
    Artifact {
        /// Run identifier.
        run_id: String,
    },

    /// Print the stored result of a run as JSON.
    Result {
        /// Run identifier.
        run_id: String,
    },

    /// List recent runs.
    Runs {
        /// Maximum number of runs to show.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Check every configured model target.
    Health,

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
        0 => "brandlens=info",
        1 => "brandlens=debug",
        _ => "brandlens=trace",
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
    let data_dir = cli.data_dir;
    match cli.command {
        Command::Run {
            url,
            source,
            fixtures,
            json,
        } => cmd_run(&url, source, fixtures, data_dir, json).await,
        Command::Artifact { run_id } => cmd_artifact(&run_id, data_dir).await,
        Command::Result { run_id } => cmd_result(&run_id, data_dir).await,
        Command::Runs { limit } => cmd_runs(limit, data_dir).await,
        Command::Health => cmd_health().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

fn resolve_data_dir(config: &AppConfig, flag: Option<PathBuf>) -> Result<PathBuf> {
    match flag {
        Some(dir) => Ok(dir),
        None => Ok(config.data_dir()?),
    }
}

fn parse_run_id(raw: &str) -> Result<RunId> {
    raw.trim()
        .parse::<RunId>()
        .map_err(|e| eyre!("invalid run id `{raw}`: {e}"))
}

async fn open_ledger_readonly(data_dir: &Path) -> Result<Storage> {
    Ok(Storage::open_readonly(&data_dir.join(LEDGER_FILE)).await?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    url: &str,
    source: Option<SourceMode>,
    fixtures: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    validate_config(&config)?;
    validate_api_keys(&config)?;

    let data_dir = resolve_data_dir(&config, data_dir)?;
    let mode = match source {
        Some(mode) => mode,
        None => SourceMode::from_config(&config.defaults.source)?,
    };

    let source: Arc<dyn ContentSource> = match mode {
        SourceMode::Http => Arc::new(HttpSource::new(&config.source)?),
        SourceMode::Fixture => {
            let dir = match fixtures {
                Some(dir) => dir,
                None => expand_home(&config.defaults.fixture_dir)?,
            };
            Arc::new(FixtureSource::new(dir))
        }
    };

    let router = Arc::new(ModelRouter::from_config(&config)?);
    let store = Arc::new(FsContentStore::new(&data_dir));
    let ledger = Arc::new(Storage::open(&data_dir.join(LEDGER_FILE)).await?);

    info!(url, source = ?mode, data_dir = %data_dir.display(), "starting brandlens run");

    let controller = PipelineController::new(source, router, store, &config.content, Some(ledger));
    let progress = CliProgress::new(json);
    let report = controller.run_with_report(url, &progress).await?;
    progress.finish();

    let result = report.outcome.map_err(|e| {
        eyre!(
            "run {} failed after [{}] ({}): {e}",
            report.run.id,
            report.run.completed_steps.join(", "),
            e.kind()
        )
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result_summary(&result, &report.steps, &data_dir);
    }
    Ok(())
}

fn print_result_summary(result: &PipelineResult, steps: &[StepRecord], data_dir: &Path) {
    let profile = &result.brand_profile;
    let analysis = &result.competitor_analysis;

    println!();
    println!("  Run:        {}", result.id);
    println!("  URL:        {}", result.url);
    println!("  Brand:      {}", profile.name);
    if let Some(industry) = &profile.industry {
        println!("  Industry:   {industry}");
    }
    println!("  Summary:    {}", profile.summary);
    println!(
        "  Content:    {} of {} chars{}",
        result.content.length,
        result.content.original_length,
        if result.content.truncated { " (truncated)" } else { "" }
    );
    println!("  Competitors:");
    for competitor in &analysis.competitors {
        match &competitor.website {
            Some(site) => println!("    - {} ({site})", competitor.name),
            None => println!("    - {}", competitor.name),
        }
    }
    for step in steps {
        if let Some(served_by) = &step.served_by {
            println!("  {:<12}{served_by}", format!("{}:", step.name));
        }
    }
    println!(
        "  Result:     {}",
        data_dir
            .join("results")
            .join(format!("{}.json", result.id))
            .display()
    );
    println!();
}

async fn cmd_artifact(run_id: &str, data_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let data_dir = resolve_data_dir(&config, data_dir)?;
    let run_id = parse_run_id(run_id)?;

    let ledger = open_ledger_readonly(&data_dir).await?;
    let summary = get_artifact_summary(&ledger, &run_id).await?;

    println!();
    println!("  Run:        {run_id}");
    println!("  Original:   {} chars", summary.original_len);
    println!("  Processed:  {} chars", summary.processed_len);
    println!("  Truncated:  {}", summary.truncated);
    println!("  Stored as:  {}", summary.original_ref);
    println!("  SHA-256:    {}", summary.original_sha256);
    println!("  Preview:    {}", summary.preview.replace('\n', " "));
    println!();
    Ok(())
}

async fn cmd_result(run_id: &str, data_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let data_dir = resolve_data_dir(&config, data_dir)?;
    let run_id = parse_run_id(run_id)?;

    let store = FsContentStore::new(&data_dir);
    let result = store
        .load_result(&run_id)
        .await?
        .ok_or_else(|| eyre!("no result stored for run {run_id}"))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_runs(limit: u32, data_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let data_dir = resolve_data_dir(&config, data_dir)?;
    let ledger = open_ledger_readonly(&data_dir).await?;

    let runs = ledger.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded in {}", data_dir.display());
        return Ok(());
    }

    for run in runs {
        let steps = if run.completed_steps.is_empty() {
            "-".to_string()
        } else {
            run.completed_steps.join(",")
        };
        println!(
            "{}  {:<9}  {}  {}  [{steps}]{}",
            run.id,
            run.status,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.url,
            run.error_kind
                .map(|kind| format!("  {kind}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn cmd_health() -> Result<()> {
    let config = load_config()?;
    validate_config(&config)?;
    let router = ModelRouter::from_config(&config)?;

    let report = router.check_health().await;
    let mut tasks_without_target = Vec::new();

    for task in config.tasks.keys() {
        let targets: Vec<_> = report.iter().filter(|h| &h.task == task).collect();
        println!("{task}");
        for health in &targets {
            let mark = if health.healthy { "ok  " } else { "FAIL" };
            let detail = health
                .error
                .as_deref()
                .map(|e| format!("  {e}"))
                .unwrap_or_default();
            println!("  {mark} {:<8} {}{detail}", health.role.as_str(), health.target);
        }
        if !targets.iter().any(|h| h.healthy) {
            tasks_without_target.push(task.clone());
        }
    }

    if tasks_without_target.is_empty() {
        Ok(())
    } else {
        Err(eyre!(
            "no healthy model target for: {}",
            tasks_without_target.join(", ")
        ))
    }
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
    quiet: bool,
}

impl CliProgress {
    fn new(quiet: bool) -> Self {
        let spinner = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner, quiet }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    fn line(&self, message: String) {
        if !self.quiet {
            self.spinner.println(message);
        }
    }
}

impl ProgressReporter for CliProgress {
    fn run_started(&self, run_id: &RunId, url: &str) {
        self.line(format!("Run {run_id} for {url}"));
    }

    fn step_started(&self, name: &str, index: usize, total: usize) {
        self.spinner.set_message(format!("[{index}/{total}] {name}"));
    }

    fn step_finished(&self, name: &str, output: &StepOutput) {
        let detail = match output {
            StepOutput::Acquired(summary) if summary.truncated => format!(
                "{} chars, truncated to {}",
                summary.original_len, summary.processed_len
            ),
            StepOutput::Acquired(summary) => format!("{} chars", summary.original_len),
            StepOutput::Analyzed { served_by, .. } => format!("via {served_by}"),
            StepOutput::Compiled { result_path } => result_path.display().to_string(),
        };
        self.line(format!("  ✓ {name}: {detail}"));
    }

    fn step_failed(&self, name: &str, error: &BrandlensError) {
        self.line(format!("  ✗ {name}: {}", error.kind()));
    }
}
