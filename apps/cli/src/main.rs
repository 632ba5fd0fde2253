//! Conductor CLI - agent registry and action-item dispatch.
//!
//! This CLI provides a `conductor` command that serves the agent registry,
//! refines action items from meeting notes and dispatches them to worker
//! agents.

mod app;
mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conductor_core::{Config, init_logging};
use std::path::PathBuf;

use commands::{dispatch, refine, registry, run};

/// Conductor - agent registry with resilient dispatch
#[derive(Parser, Debug)]
#[command(
    name = "conductor",
    author,
    version,
    about = "Conductor - agent registry with resilient dispatch",
    long_about = "Conductor keeps a TTL registry of worker agents and dispatches action items to them.\nItems are routed by an oracle and executed through per-agent circuit breakers and retries."
)]
struct Args {
    /// Configuration file (overrides CONDUCTOR_CONFIG)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides [logging].level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Agent registry operations
    #[command(subcommand)]
    Registry(registry::RegistryCommand),

    /// Generate and refine action items from meeting notes
    ///
    /// Runs the generate, review and refine loop and prints the final items.
    Refine {
        /// Meeting notes file, or "-" for stdin
        notes: PathBuf,

        /// Write the refined items to this file
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Dispatch action items to registered agents
    ///
    /// Accepts either an action-items document or a bare array of items.
    Dispatch {
        /// Action items JSON file, or "-" for stdin
        items: PathBuf,
    },

    /// Refine action items from meeting notes, then dispatch them
    Run {
        /// Meeting notes file, or "-" for stdin
        notes: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging.level, config.logging.json).context("Failed to initialize logging")?;

    match args.command {
        Command::Registry(cmd) => registry::execute(cmd, &config, args.json).await?,
        Command::Refine { notes, output } => refine::execute(&notes, output.as_deref(), &config, args.json).await?,
        Command::Dispatch { items } => dispatch::execute(&items, &config, args.json).await?,
        Command::Run { notes } => run::execute(&notes, &config, args.json).await?,
    }

    Ok(())
}
