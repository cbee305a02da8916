//! Main CLI parser and top-level argument handling.

use clap::Parser;

use crate::commands::Commands;

/// Command-line interface definition for the ferry downloader.
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(about = "Download files through a prioritized, retrying transfer queue")]
#[command(version)]
pub struct Cli {
    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
