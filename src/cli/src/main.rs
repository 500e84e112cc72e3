//! Replog CLI - operator tool for replication logs and snapshots.
//!
//! Inspects snapshot files, converts time buckets and resume cursors, and
//! reads a live Redis replication log.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{bucket, cursor, log, snapshot};
use output::OutputFormat;

/// Replog - replication log and snapshot tooling
#[derive(Parser)]
#[command(
    name = "replog",
    version,
    about = "Replog - replication log and snapshot tooling",
    long_about = "Inspect snapshot files, convert time buckets and cursors, and read a live replication log.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot file operations
    #[command(subcommand)]
    Snapshot(snapshot::SnapshotCommands),

    /// Time bucket conversions
    #[command(subcommand)]
    Bucket(bucket::BucketCommands),

    /// Resume cursor conversions
    #[command(subcommand)]
    Cursor(cursor::CursorCommands),

    /// Live replication log operations
    Log(log::LogArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;

    let result = match cli.command {
        Commands::Snapshot(cmd) => snapshot::execute(cmd, format),
        Commands::Bucket(cmd) => bucket::execute(cmd, format),
        Commands::Cursor(cmd) => cursor::execute(cmd, format),
        Commands::Log(args) => log::execute(args, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
