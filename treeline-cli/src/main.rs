//! Treeline: production tree to asset store synchronization CLI.
//!
//! # Usage
//!
//! ```text
//! treeline init [--force]
//! treeline sync <project> [--dry-run] [--select <id>...] [--json]
//! treeline diff <project> [--select <id>...]
//! treeline status [<project>] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{diff::DiffArgs, init::InitArgs, status::StatusArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "treeline",
    version,
    about = "Reconcile a production-tracking tree with a pipeline asset store",
    long_about = None,
)]
struct Cli {
    /// Log every decision (overridden by RUST_LOG).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file.
    Init(InitArgs),

    /// Synchronize one project and print the report.
    Sync(SyncArgs),

    /// Show unified diffs of the target documents a sync would change.
    Diff(DiffArgs),

    /// Show store counts and last sync time per project.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
