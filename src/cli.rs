//! Command-line arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Mirror product archives from an FTP server into local stores.
#[derive(Parser, Debug)]
#[command(name = "ftp-mirror")]
#[command(author, version, about)]
pub struct Args {
    /// Run configuration (TOML)
    #[arg(short, long, default_value = "ftp-mirror.toml")]
    pub config: PathBuf,

    /// Log per-transfer detail at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Write the JSON run report to this file
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Mirror every configured remote root (default)
    Mirror,
    /// Fetch ancillary files newer than the newest local one
    Ancillary,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Mirror)
    }
}
