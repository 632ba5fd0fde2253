//! Command implementations for the Conductor CLI.

pub mod dispatch;
pub mod refine;
pub mod registry;
pub mod run;

use anyhow::{Context, Result};
use colored::Colorize;
use conductor_orchestrator::{DispatchSummary, ExecutionResult};
use std::io::Read;
use std::path::Path;

/// Reads a file, or stdin when `path` is `-`.
pub(crate) fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer).context("Failed to read stdin")?;
        return Ok(buffer);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Prints a value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn print_dispatch_summary(summary: &DispatchSummary) {
    println!("{}", "Dispatch Results".bold().cyan());
    println!();
    for result in &summary.results {
        print_result(result);
    }
    println!();

    let tally = format!("{}/{} succeeded", summary.successful, summary.total);
    if summary.successful == summary.total {
        println!("{}", tally.green());
    } else {
        println!("{}", tally.yellow());
    }
}

fn print_result(result: &ExecutionResult) {
    let marker = if result.is_success() {
        "✓".green()
    } else if result.request_error && result.agent_error {
        "?".yellow()
    } else {
        "✗".red()
    };
    println!(
        "  {} [{}] {} -> {}",
        marker,
        result.action_item_index,
        result.action_item.title.bold(),
        result.agent_name.cyan()
    );
    println!("      {}", result.response.dimmed());
    if result.additional_info_required {
        println!("      {}", "Agent needs more information".yellow());
    }
}
