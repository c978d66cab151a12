//! arXiv Digest CLI
//!
//! One-shot entry point meant to be run from a scheduler: `accumulate`
//! daily, `deliver` weekly. The process exit code reports the outcome.

use std::path::{Path, PathBuf};

use arxiv_digest::{
    error::{EXIT_CONFIG, EXIT_SUCCESS, Result, describe_exit_code},
    logging::TeeWriter,
    models::{Config, RunKind},
    pipeline::{self, Pipeline},
    services::{ArxivCollector, Notifier, Summarizer},
    storage::{RecordStore, SqliteStore},
};
use clap::{Parser, Subcommand};

/// arXiv Digest - weekly paper digest bot
#[derive(Parser, Debug)]
#[command(
    name = "arxiv-digest",
    version,
    about = "Accumulates arXiv papers and emails a ranked, summarized digest"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new papers into the staging store
    #[command(alias = "ingest")]
    Accumulate,

    /// Rank, summarize and email the pending papers
    #[command(alias = "digest")]
    Deliver,

    /// Validate configuration
    Validate,

    /// Show store counters and recent runs
    Status {
        /// Number of runs to list
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

/// Read the config file when present, then overlay the environment.
fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        Config::default()
    };
    config.apply_env()?;
    Ok(config)
}

/// Initialize logging to stderr and the application log file.
fn init_logging(verbose: bool, config: Option<&Config>) {
    let level = match (verbose, config) {
        (true, _) => "debug",
        (false, Some(config)) => config.logging.level.as_str(),
        (false, None) => "info",
    };

    let writer = match config.map(Config::log_path) {
        Some(path) => TeeWriter::open(&path).unwrap_or_else(|e| {
            eprintln!("Cannot open log file {}: {}", path.display(), e);
            TeeWriter::stderr_only()
        }),
        None => TeeWriter::stderr_only(),
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .write_style(env_logger::WriteStyle::Never)
        .target(env_logger::Target::Pipe(Box::new(writer)))
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let loaded = load_config(&cli.config);
    init_logging(cli.verbose, loaded.as_ref().ok());

    if !cli.config.exists() {
        log::warn!(
            "Config file {} not found, using defaults and environment",
            cli.config.display()
        );
    }

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration from {}: {}", cli.config.display(), e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let code = match cli.command {
        Command::Accumulate => run(&config, RunKind::Accumulate).await,
        Command::Deliver => run(&config, RunKind::Deliver).await,
        Command::Validate => validate(&config),
        Command::Status { limit } => status(&config, limit),
    };

    log::info!("Exit code {} ({})", code, describe_exit_code(code));
    std::process::exit(code);
}

/// Assemble the store and services, then execute one run.
async fn run(config: &Config, kind: RunKind) -> i32 {
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        let store = SqliteStore::open(config.database_path()).ok();
        let notifier = Notifier::new(config).ok();
        return pipeline::abort(
            config,
            store.as_ref().map(|s| s as &dyn RecordStore),
            notifier.as_ref(),
            kind,
            &e,
        )
        .await;
    }

    let store = match SqliteStore::open(config.database_path()) {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to open store {}: {}", config.database_path().display(), e);
            let notifier = Notifier::new(config).ok();
            return pipeline::abort(config, None, notifier.as_ref(), kind, &e).await;
        }
    };

    let notifier = match Notifier::new(config) {
        Ok(notifier) => notifier,
        Err(e) => return pipeline::abort(config, Some(&store), None, kind, &e).await,
    };

    let services = ArxivCollector::new(config)
        .and_then(|source| Ok((source, Summarizer::new(config)?)));
    let (source, summarizer) = match services {
        Ok(services) => services,
        Err(e) => {
            log::error!("Failed to initialize services: {}", e);
            return pipeline::abort(config, Some(&store), Some(&notifier), kind, &e).await;
        }
    };

    Pipeline::new(config, &store, &source, &summarizer, &notifier)
        .run(kind)
        .await
}

fn validate(config: &Config) -> i32 {
    log::info!("Validating configuration...");

    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return e.exit_code();
    }

    log::info!("Categories: {}", config.source.categories.join(", "));
    log::info!(
        "Fetch limit {}, display limit {}",
        config.source.fetch_limit,
        config.ranking.display_limit
    );
    if config.ranking.keywords.is_empty() {
        log::info!("Ranking: recency (no interest keywords)");
    } else {
        log::info!("Ranking: keywords {}", config.ranking.keywords.join(", "));
    }
    log::info!("Digest recipients: {}", config.email.to.len());
    log::info!("Database: {}", config.database_path().display());
    log::info!("All validations passed!");
    EXIT_SUCCESS
}

fn status(config: &Config, limit: usize) -> i32 {
    let report = || -> Result<()> {
        let store = SqliteStore::open(config.database_path())?;
        log::info!("Database: {}", config.database_path().display());
        log::info!("Pending papers: {}", store.pending_count()?);
        log::info!("Processed papers: {}", store.processed_count()?);

        for kind in [RunKind::Accumulate, RunKind::Deliver] {
            match store.last_successful_run(kind)? {
                Some(ts) => log::info!("Last successful {}: {}", kind, ts.to_rfc3339()),
                None => log::info!("Last successful {}: never", kind),
            }
        }

        let runs = store.recent_runs(limit)?;
        if runs.is_empty() {
            log::info!("No runs recorded yet.");
        }
        for run in runs {
            log::info!(
                "#{} {} {} {} count={}{}",
                run.id,
                run.timestamp.format("%Y-%m-%d %H:%M:%S"),
                run.kind,
                run.status,
                run.count,
                run.error.map(|e| format!(" error={e}")).unwrap_or_default()
            );
        }
        Ok(())
    };

    match report() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            log::error!("Status failed: {}", e);
            e.exit_code()
        }
    }
}
