//! Market-Sweep main entry point
//!
//! This is the command-line interface for the Market-Sweep listing aggregator.

use anyhow::Context;
use clap::{Parser, Subcommand};
use market_sweep::config::{load_config, load_config_with_hash, Config};
use market_sweep::lock::CrawlLock;
use market_sweep::matching::MatchMode;
use market_sweep::output;
use market_sweep::storage::{open_storage, SqliteStorage, Storage};
use market_sweep::{Orchestrator, Trigger};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Market-Sweep: a marketplace listing aggregator
///
/// Market-Sweep scrapes the configured marketplaces one after another,
/// matches their listings against your search terms and stores new
/// matches. Only one crawl runs at a time across all processes.
#[derive(Parser, Debug)]
#[command(name = "market-sweep")]
#[command(version)]
#[command(about = "A marketplace listing aggregator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "market-sweep.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl all active sources
    Crawl {
        /// Who started the crawl: cli, cron or manual
        #[arg(long, default_value = "cli")]
        trigger: Trigger,
    },

    /// Show who holds the crawl lock
    LockInfo,

    /// Show recent crawls
    History {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },

    /// Manage search terms
    Terms {
        #[command(subcommand)]
        action: TermsAction,
    },

    /// Manage exclude terms
    Excludes {
        #[command(subcommand)]
        action: ExcludesAction,
    },

    /// Enable or disable sources
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },

    /// List stored matches
    Matches {
        /// Only matches not yet marked as seen
        #[arg(long)]
        new: bool,
    },

    /// Mark all matches as seen
    MarkSeen,
}

#[derive(Subcommand, Debug)]
enum TermsAction {
    List,
    Add {
        term: String,
        #[arg(long, value_enum, default_value = "exact")]
        mode: ModeArg,
    },
    Remove {
        id: i64,
    },
    Enable {
        id: i64,
    },
    Disable {
        id: i64,
    },
    /// Change how a term is compared against titles
    Mode {
        id: i64,
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Give a term precedence over the one before it
    MoveUp {
        id: i64,
    },
    MoveDown {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum ExcludesAction {
    List,
    Add { term: String },
    Remove { id: i64 },
    Enable { id: i64 },
    Disable { id: i64 },
}

#[derive(Subcommand, Debug)]
enum SourcesAction {
    List,
    Enable { id: i64 },
    Disable { id: i64 },
    /// Crawl a source before the one preceding it
    MoveUp { id: i64 },
    MoveDown { id: i64 },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Exact,
    Similar,
}

impl From<ModeArg> for MatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Exact => MatchMode::Exact,
            ModeArg::Similar => MatchMode::Similar,
        }
    }
}

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFLICT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Command::Crawl { trigger } => return handle_crawl(&cli.config, trigger).await,
        Command::LockInfo => handle_lock_info(&cli.config),
        Command::History { limit } => handle_history(&cli.config, limit),
        Command::Terms { action } => handle_terms(&cli.config, action),
        Command::Excludes { action } => handle_excludes(&cli.config, action),
        Command::Sources { action } => handle_sources(&cli.config, action),
        Command::Matches { new } => handle_matches(&cli.config, new),
        Command::MarkSeen => handle_mark_seen(&cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` wins over the flags when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("market_sweep=info,warn"),
                1 => EnvFilter::new("market_sweep=debug,info"),
                2 => EnvFilter::new("market_sweep=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    load_config(path).with_context(|| format!("Failed to load configuration {}", path.display()))
}

/// Opens the database and registers the configured sources
fn open_db(config: &Config) -> anyhow::Result<SqliteStorage> {
    let mut storage = open_storage(Path::new(&config.database.path))
        .with_context(|| format!("Failed to open database {}", config.database.path))?;

    for source in &config.sources {
        storage.ensure_source(&source.name, &source.base_url)?;
    }
    storage.ensure_default_exclude_terms(&config.exclude_defaults)?;
    Ok(storage)
}

/// Handles the crawl command
///
/// Exit codes: 0 if at least one source succeeded or nothing was active,
/// 1 if every attempted source failed or the crawl errored, 2 if another
/// crawl is running.
async fn handle_crawl(config_path: &Path, trigger: Trigger) -> ExitCode {
    tracing::info!("Loading configuration from: {}", config_path.display());
    let (config, config_hash) = match load_config_with_hash(config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    let mut orchestrator = match Orchestrator::from_config(&config, &config_hash) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match orchestrator.run(trigger).await {
        Ok(result) => {
            output::print_crawl_summary(&result);
            if result.is_complete_failure() {
                ExitCode::from(EXIT_FAILURE)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) if e.is_conflict() => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_CONFLICT)
        }
        Err(e) => {
            eprintln!("Error: crawl failed: {}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn handle_lock_info(config_path: &Path) -> anyhow::Result<()> {
    let config = read_config(config_path)?;
    let lock = CrawlLock::new(&config.crawler.lock_path);

    match lock.holder_info() {
        Some(info) => {
            println!("Lock: {}", lock.path().display());
            println!("  PID:      {}", info.pid);
            println!("  Trigger:  {}", info.trigger);
            println!("  Since:    {}", info.acquired_at.to_rfc3339());
            if lock.is_stale() {
                println!("  (stale: holder is no longer running)");
            }
        }
        None if lock.is_stale() => println!("Lock file is unreadable and will be replaced"),
        None => println!("Lock not held"),
    }
    Ok(())
}

fn handle_history(config_path: &Path, limit: u32) -> anyhow::Result<()> {
    let storage = open_db(&read_config(config_path)?)?;
    print!(
        "{}",
        output::format_crawl_history(&storage.get_recent_crawl_logs(limit)?)
    );
    Ok(())
}

fn handle_terms(config_path: &Path, action: TermsAction) -> anyhow::Result<()> {
    let mut storage = open_db(&read_config(config_path)?)?;

    match action {
        TermsAction::List => {
            print!(
                "{}",
                output::format_search_terms(&storage.get_all_search_terms()?)
            );
        }
        TermsAction::Add { term, mode } => {
            let id = storage.create_search_term(&term, mode.into())?;
            println!("Added search term {} ('{}')", id, term.trim());
        }
        TermsAction::Remove { id } => {
            storage.delete_search_term(id)?;
            println!("Removed search term {}", id);
        }
        TermsAction::Enable { id } => {
            storage.set_search_term_active(id, true)?;
            println!("Enabled search term {}", id);
        }
        TermsAction::Disable { id } => {
            storage.set_search_term_active(id, false)?;
            println!("Disabled search term {}", id);
        }
        TermsAction::Mode { id, mode } => {
            let mode = MatchMode::from(mode);
            storage.set_search_term_mode(id, mode)?;
            println!("Search term {} now matches {}", id, mode);
        }
        TermsAction::MoveUp { id } => {
            report_move("Search term", id, storage.move_search_term_up(id)?, "first");
        }
        TermsAction::MoveDown { id } => {
            report_move("Search term", id, storage.move_search_term_down(id)?, "last");
        }
    }
    Ok(())
}

fn handle_excludes(config_path: &Path, action: ExcludesAction) -> anyhow::Result<()> {
    let mut storage = open_db(&read_config(config_path)?)?;

    match action {
        ExcludesAction::List => {
            print!(
                "{}",
                output::format_exclude_terms(&storage.get_all_exclude_terms()?)
            );
        }
        ExcludesAction::Add { term } => {
            let id = storage.create_exclude_term(&term)?;
            println!("Added exclude term {} ('{}')", id, term.trim());
        }
        ExcludesAction::Remove { id } => {
            storage.delete_exclude_term(id)?;
            println!("Removed exclude term {}", id);
        }
        ExcludesAction::Enable { id } => {
            storage.set_exclude_term_active(id, true)?;
            println!("Enabled exclude term {}", id);
        }
        ExcludesAction::Disable { id } => {
            storage.set_exclude_term_active(id, false)?;
            println!("Disabled exclude term {}", id);
        }
    }
    Ok(())
}

fn handle_sources(config_path: &Path, action: SourcesAction) -> anyhow::Result<()> {
    let mut storage = open_db(&read_config(config_path)?)?;

    match action {
        SourcesAction::List => {
            print!("{}", output::format_sources(&storage.get_all_sources()?));
        }
        SourcesAction::Enable { id } => {
            storage.set_source_active(id, true)?;
            println!("Enabled source {}", id);
        }
        SourcesAction::Disable { id } => {
            storage.set_source_active(id, false)?;
            println!("Disabled source {}", id);
        }
        SourcesAction::MoveUp { id } => {
            report_move("Source", id, storage.move_source_up(id)?, "first");
        }
        SourcesAction::MoveDown { id } => {
            report_move("Source", id, storage.move_source_down(id)?, "last");
        }
    }
    Ok(())
}

fn report_move(entity: &str, id: i64, moved: bool, edge: &str) {
    if moved {
        println!("Moved {} {}", entity.to_lowercase(), id);
    } else {
        println!("{} {} is already {}", entity, id, edge);
    }
}

fn handle_matches(config_path: &Path, only_new: bool) -> anyhow::Result<()> {
    let storage = open_db(&read_config(config_path)?)?;
    let matches = if only_new {
        storage.get_new_matches()?
    } else {
        storage.get_all_matches()?
    };
    print!("{}", output::format_matches(&matches));
    Ok(())
}

fn handle_mark_seen(config_path: &Path) -> anyhow::Result<()> {
    let mut storage = open_db(&read_config(config_path)?)?;
    let count = storage.mark_matches_seen()?;
    println!("Marked {} matches as seen", count);
    Ok(())
}
