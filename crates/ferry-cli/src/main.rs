//! CLI entry point.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ferry_cli::{Cli, Commands, handlers};

fn init_tracing(verbose: bool) {
    let default = if verbose { "ferry=debug" } else { "ferry=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let report = match cli.command {
        Commands::Get(args) => handlers::get::execute(&args).await,
    };

    let report = match report {
        Ok(report) => report,
        Err(err) => {
            eprintln!("Error: {err}");
            return Ok(ExitCode::from(err.exit_code()));
        }
    };

    let mut stdout = io::stdout().lock();
    report
        .print_summary(&mut stdout)
        .and_then(|()| stdout.flush())
        .context("Failed to write summary")?;

    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
