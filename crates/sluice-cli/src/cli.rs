use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sluice",
    about = "Sluice upload gateway: serve, inspect and repair artifacts",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Gateway configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP gateway
    Serve(ServeArgs),
    /// Reconcile ledger, lock and storage state for an artifact
    Check(CheckArgs),
    /// Upload a local file through the coordinator
    Upload(UploadArgs),
    /// Print one record of a packed container
    PackGet(PackGetArgs),
    /// List the record keys of a packed container
    PackLs(PackLsArgs),
    /// Inspect or clear upload locks
    Locks(LocksArgs),
    /// Show every ledger entry recorded for an artifact
    History(HistoryArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Overrides `server.bind_addr`.
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args)]
pub struct CheckArgs {
    pub path: String,
    /// Record key inside a packed container.
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Args)]
pub struct UploadArgs {
    pub path: String,
    pub file: PathBuf,
    /// JSON object stored with the ledger entry.
    #[arg(long)]
    pub meta: String,
    /// Append to the packed container at `path` under this key.
    #[arg(long)]
    pub key: Option<String>,
    #[arg(long, default_value = "operator")]
    pub uploader: String,
}

#[derive(Args)]
pub struct PackGetArgs {
    pub path: String,
    pub key: String,
    /// Write the payload here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct PackLsArgs {
    pub path: String,
}

#[derive(Args)]
pub struct LocksArgs {
    #[command(subcommand)]
    pub action: LocksAction,
}

#[derive(Subcommand)]
pub enum LocksAction {
    /// List held locks
    List,
    /// Clear the lock on a path, whoever holds it
    Release { path: String },
}

#[derive(Args)]
pub struct HistoryArgs {
    pub path: String,
    #[arg(long)]
    pub key: Option<String>,
}
