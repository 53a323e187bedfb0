use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Rename and relocate media files with full rollback.
#[derive(Parser)]
#[command(name = "mediamove", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Clone, Default)]
pub struct GlobalArgs {
    /// Path to a JSON settings file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding transaction records.
    #[arg(long, global = true, env = "MEDIAMOVE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Output structured JSON to stdout.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print JSON Schema for manifests.
    Schema,
    /// Pre-flight check a manifest without touching anything.
    Validate(ValidateArgs),
    /// Validate and apply a manifest inside a transaction.
    Apply(ApplyArgs),
    /// Reverse a completed or failed transaction.
    Rollback(RollbackArgs),
    /// List recorded transactions.
    List,
    /// Print a transaction record.
    Show(ShowArgs),
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Path to manifest JSON file.
    #[arg(long, required = true)]
    pub manifest: PathBuf,

    /// Override root directory.
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Path to manifest JSON file.
    #[arg(long, required = true)]
    pub manifest: PathBuf,

    /// Validate and print the plan without executing it.
    #[arg(long)]
    pub dry_run: bool,

    /// Override root directory.
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Args)]
pub struct RollbackArgs {
    /// Transaction id.
    pub id: String,

    /// Never remove this directory, or climb above it, when cleaning up
    /// directories left empty.
    #[arg(long)]
    pub boundary: Option<PathBuf>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Transaction id.
    pub id: String,
}
