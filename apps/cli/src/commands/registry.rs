//! Registry commands: serve the registry, list agents, show statistics.

use super::print_json;
use anyhow::{Context, Result, bail};
use clap::Subcommand;
use colored::Colorize;
use conductor_core::{AgentRegistry, Config, MemoryStore, RegistryClient, RegistryService};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Registry subcommands
#[derive(Subcommand, Debug)]
pub enum RegistryCommand {
    /// Run the registry HTTP service until interrupted
    Serve {
        /// Bind address (overrides [server].address)
        #[arg(long)]
        address: Option<SocketAddr>,
    },
    /// List live agents
    Discover,
    /// Show registry statistics
    Stats,
}

/// Execute registry command
pub async fn execute(cmd: RegistryCommand, config: &Config, json: bool) -> Result<()> {
    match cmd {
        RegistryCommand::Serve { address } => serve(config, address.unwrap_or(config.server.address)).await,
        RegistryCommand::Discover => discover(config, json).await,
        RegistryCommand::Stats => stats(config, json).await,
    }
}

async fn serve(config: &Config, address: SocketAddr) -> Result<()> {
    let registry = Arc::new(AgentRegistry::new(Arc::new(MemoryStore::new()), config.registry.agent_ttl()));
    let service = Arc::new(RegistryService::new(registry, config.registry.clone()));
    let listener =
        RegistryService::bind(address).await.with_context(|| format!("Failed to bind {address}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = service.spawn_cleanup(shutdown_rx.clone());
    let server = tokio::spawn(Arc::clone(&service).serve(listener, shutdown_rx));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Interrupt received, shutting down");
    let _ = shutdown_tx.send(true);

    server.await.context("Registry service task failed")??;
    cleanup.await.context("Cleanup task failed")?;
    Ok(())
}

async fn discover(config: &Config, json: bool) -> Result<()> {
    let client = RegistryClient::from_config(&config.client);
    let agents = client.discover().await;

    if json {
        return print_json(&agents);
    }

    println!("{}", "Registered Agents".bold().cyan());
    println!("  Registry: {}", client.endpoint().dimmed());
    println!();
    if agents.is_empty() {
        println!("  {}", "No agents found".yellow());
        return Ok(());
    }
    for agent in &agents {
        println!("  {} ({})", agent.name.bold(), agent.agent_id.dimmed());
        println!("      {}", agent.description);
        println!("      {}", agent.endpoint.cyan());
    }
    println!();
    println!("  Total: {}", agents.len().to_string().green());
    Ok(())
}

async fn stats(config: &Config, json: bool) -> Result<()> {
    let client = RegistryClient::from_config(&config.client);
    let Some(stats) = client.stats().await else {
        bail!("Registry at {} is unreachable", client.endpoint());
    };

    if json {
        return print_json(&stats);
    }

    let registry = &stats["registry_stats"];
    println!("{}", "Registry Statistics".bold().cyan());
    println!("  Registry: {}", client.endpoint().dimmed());
    println!("  Total agents: {}", registry["total_agents"].to_string().green());
    println!("  Enabled: {}", registry["registry_enabled"]);
    Ok(())
}
