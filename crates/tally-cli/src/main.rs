#![forbid(unsafe_code)]

//! `ty` — offline-first inventory and transaction tracker.
//!
//! Thin shell over `tally-core`: every subcommand opens the durable
//! local store, runs one operation, and renders the result in
//! pretty/text/JSON parity.

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::env;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use output::{CliError, OutputMode, render_error, resolve_output_mode};
use tally_core::error::SyncError;

#[derive(Parser, Debug)]
#[command(
    name = "ty",
    version,
    about = "Offline-first inventory tracker with a durable sync queue",
    long_about = "Track items and transactions offline, queue every mutation durably, \
                  and reconcile with the remote when connectivity returns."
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(long, global = true)]
    verbose: bool,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Project Maintenance",
        about = "Initialize a tally project",
        long_about = "Create the .tally/ store directory, write the default config, and migrate the local database.",
        after_help = "EXAMPLES:\n    # Initialize with the default scope\n    ty init\n\n    # Initialize for a named account scope\n    ty init --scope acct-1"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Sync",
        about = "Show queue depth, reviews, and storage quota",
        after_help = "EXAMPLES:\n    # Human summary\n    ty status\n\n    # Emit machine-readable output\n    ty status --json"
    )]
    Status,

    #[command(
        next_help_heading = "Sync",
        about = "List durable queue entries",
        long_about = "List pending offline operations, or permanently failed ones with --failed.",
        after_help = "EXAMPLES:\n    # Pending operations\n    ty queue\n\n    # Entries retired after exhausting retries\n    ty queue --failed"
    )]
    Queue(cmd::queue::QueueArgs),

    #[command(
        next_help_heading = "Sync",
        about = "List conflicts awaiting review",
        after_help = "EXAMPLES:\n    # Review backlog\n    ty review\n\n    # Emit machine-readable output\n    ty review --json"
    )]
    Review,

    #[command(
        next_help_heading = "Lineage",
        about = "Show an item's movement history",
        long_about = "Print the append-only ledger of container moves for one item, oldest first.",
        after_help = "EXAMPLES:\n    # Where has this item been?\n    ty lineage it-0a1b2c3d\n\n    # Emit machine-readable output\n    ty lineage it-0a1b2c3d --json"
    )]
    Lineage(cmd::lineage::LineageArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Purge expired cached media",
        after_help = "EXAMPLES:\n    # Drop blobs past their TTL\n    ty gc"
    )]
    Gc,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "tally=debug,info"
        } else {
            "tally=info,warn"
        })
    });

    let format = env::var("TALLY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry.with(fmt::layer().json().with_ansi(false)).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = std::env::current_dir()?;
    let output = resolve_output_mode(cli.format, cli.json);

    let command_result = match cli.command {
        Commands::Init(args) => cmd::init::run_init(&args, &project_root),
        Commands::Status => cmd::status::run_status(output, &project_root),
        Commands::Queue(ref args) => cmd::queue::run_queue(args, output, &project_root),
        Commands::Review => cmd::review::run_review(output, &project_root),
        Commands::Lineage(ref args) => cmd::lineage::run_lineage(args, output, &project_root),
        Commands::Gc => cmd::gc::run_gc(output, &project_root),
    };

    if let Err(err) = command_result {
        let cli_error = err
            .downcast_ref::<SyncError>()
            .map_or_else(|| CliError::new(err.to_string()), CliError::from);
        render_error(output, &cli_error)?;
        std::process::exit(1);
    }
    Ok(())
}
