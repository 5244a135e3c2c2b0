//! Affirm CLI
//!
//! Operator interface for the attestation authority: key management,
//! signing, verification, scoring and state snapshots.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commands;
mod config;
mod keyfile;

use affirm_core::{Clock, SystemClock};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "affirm", version)]
#[command(about = "Affirm - signed attestations, key rotation and policy-gated admission", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./affirm.yaml when present)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a signing key
    Keygen(commands::keys::KeygenArgs),
    /// Retire the current key into history and generate a new one
    Rotate,
    /// Print the publishable keyset
    Keyset,
    /// Sign a JSON document into an attestation
    Sign(commands::sign::SignArgs),
    /// Verify an attestation
    Verify(commands::verify::VerifyArgs),
    /// Verify a detached signature over a payload or digest
    VerifyRaw(commands::verify::VerifyRawArgs),
    /// Score and gate candidate entities
    Score(commands::score::ScoreArgs),
    /// Build and seal a state snapshot
    Snapshot(commands::score::SnapshotArgs),
}

fn init_tracing(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "warn,affirm=info",
        1 => "warn,affirm=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config = config::AffirmConfig::load(cli.config.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let output = match cli.command {
        Commands::Keygen(args) => commands::keys::keygen(&args, &config, clock)?,
        Commands::Rotate => commands::keys::rotate(&config, clock)?,
        Commands::Keyset => commands::keys::keyset(&config, clock)?,
        Commands::Sign(args) => commands::sign::execute(&args, &config, clock).await?,
        Commands::Verify(args) => commands::verify::execute(&args, &config, clock)?,
        Commands::VerifyRaw(args) => commands::verify::execute_raw(&args, &config, clock)?,
        Commands::Score(args) => commands::score::execute(&args, &config, clock)?,
        Commands::Snapshot(args) => commands::score::execute_snapshot(&args, &config, clock).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output.body)?);
    if !output.success {
        std::process::exit(1);
    }
    Ok(())
}
