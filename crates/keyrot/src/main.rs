//! keyrot CLI - Key rotation for encrypted secret stores
//!
//! This is the main entry point for the keyrot command-line interface.

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Rotate(args) => commands::rotate::run(args, config).await,
        Commands::Backup(args) => commands::backup::run(args, config).await,
        Commands::Validate(args) => commands::validate::run(args, config),
        Commands::Rollback(args) => commands::rollback::run(args, config).await,
        Commands::Status(args) => commands::status::run(args, config),
        Commands::Keygen(args) => commands::keygen::run(args, config).await,
        Commands::Prune(args) => commands::prune::run(args, config).await,
    }
}

/// Initialize tracing with appropriate verbosity
///
/// Logs go to stderr so `--json` output on stdout stays machine-readable.
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
