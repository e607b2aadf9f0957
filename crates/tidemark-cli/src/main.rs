//! tidemark - timestamped, reversible database migrations.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tidemark_config::ConfigLoader;
use tidemark_engine::{Direction, ExecuteOptions, Migrator, Reporter, RunReport, TracingReporter};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod output;

use output::ConsoleReporter;

#[derive(Parser, Debug)]
#[command(name = "tidemark")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a configuration file (toml, yml or yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit log records as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Copy)]
struct RunFlags {
    /// Keep going after a failed migration
    #[arg(short, long)]
    force: bool,

    /// Show what would run without changing anything
    #[arg(short = 'p', long)]
    dry_run: bool,
}

impl From<RunFlags> for ExecuteOptions {
    fn from(flags: RunFlags) -> Self {
        ExecuteOptions {
            forced: flags.force,
            dry_run: flags.dry_run,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations up to and including a ledger id
    Up {
        /// Ledger id of the target migration
        id: i64,

        #[command(flatten)]
        flags: RunFlags,
    },

    /// Revert applied migrations newer than a ledger id (0 reverts all)
    Down {
        /// Ledger id of the target migration, or 0 for none
        #[arg(allow_negative_numbers = true)]
        id: i64,

        #[command(flatten)]
        flags: RunFlags,
    },

    /// Apply every pending migration
    Latest {
        #[command(flatten)]
        flags: RunFlags,
    },

    /// Run a single migration in one direction
    Run {
        /// up or down
        #[arg(value_parser = parse_direction)]
        direction: Direction,

        /// Ledger id of the migration
        id: i64,

        #[command(flatten)]
        flags: RunFlags,
    },

    /// List known migrations
    #[command(alias = "ls")]
    List {
        /// Page number
        #[arg(default_value_t = 1)]
        page: usize,

        /// Entries per page
        #[arg(default_value_t = 30)]
        per_page: usize,
    },

    /// Show the current migration and what is pending
    Status,

    /// Print the SQL a migration would run
    Preview {
        /// up or down
        #[arg(value_parser = parse_direction)]
        direction: Direction,

        /// Ledger id of the migration
        id: i64,
    },
}

fn parse_direction(s: &str) -> std::result::Result<Direction, String> {
    s.parse::<Direction>().map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli) {
        Ok(code) => code,
        Err(e) if !is_fatal(&e) => {
            eprintln!("warning: {e:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Errors that did not come from the engine are always fatal.
fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<tidemark_common::Error>()
        .is_none_or(|e| e.is_fatal())
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so stdout stays clean for --json output.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = ConfigLoader::new()
        .load(cli.config.as_deref())
        .context("failed to load configuration")?;
    debug!(?config, "configuration loaded");

    let mut migrator = Migrator::from_config(&config).with_context(|| {
        format!(
            "failed to open {} database at {}",
            config.database.driver,
            config.database.path.display()
        )
    })?;

    let mut console = ConsoleReporter::new();
    let mut tracing_sink = TracingReporter;
    let reporter: &mut dyn Reporter = if cli.json {
        &mut tracing_sink
    } else {
        &mut console
    };

    let report = match cli.command {
        Commands::Up { id, flags } => migrator.up(id, flags.into(), reporter),
        Commands::Down { id, flags } => migrator.down(id, flags.into(), reporter),
        Commands::Latest { flags } => migrator.latest(flags.into(), reporter),
        Commands::Run {
            direction,
            id,
            flags,
        } => migrator.run_one(direction, id, flags.into(), reporter),
        Commands::List { page, per_page } => {
            let listing = migrator.list(page, per_page).context("failed to list migrations")?;
            output::print_listing(&listing, cli.json)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Status => {
            let status = migrator.status().context("failed to read status")?;
            output::print_status(&status, cli.json)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Preview { direction, id } => {
            let statements = migrator
                .preview(direction, id)
                .with_context(|| format!("failed to preview migration {id}"))?;
            output::print_statements(&statements, cli.json)?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    let report = report.context("migration run aborted")?;
    finish(&report, cli.json)
}

fn finish(report: &RunReport, json: bool) -> Result<ExitCode> {
    output::print_report(report, json)?;
    if report.halted() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
