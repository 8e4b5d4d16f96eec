//! `blocktree` command-line binary.
//!
//! # Usage
//!
//! ```bash
//! blocktree create test.idx
//! blocktree insert test.idx 15 100
//! blocktree search test.idx 15
//! blocktree load test.idx input.csv
//! blocktree print test.idx
//! blocktree extract test.idx output.csv
//!
//! # Reject duplicate keys instead of updating them
//! BLOCKTREE_DUPLICATE_KEYS=reject blocktree insert test.idx 15 200
//! ```

use std::io::Write;
use std::process::ExitCode;

use blocktree::commands::{self, Command};
use blocktree::config::IndexConfig;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Single-file B-tree index of unsigned 64-bit keys and values.
#[derive(Debug, Parser)]
#[command(name = "blocktree", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "blocktree=warn".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match IndexConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = commands::run(&cli.command, &config, &mut out)
        .and_then(|()| out.flush().map_err(Into::into));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("command {:?} failed: {e:?}", cli.command);
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
