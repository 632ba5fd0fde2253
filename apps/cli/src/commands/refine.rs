//! Refine command implementation.

use super::{print_json, read_input};
use crate::app::App;
use anyhow::{Context, Result};
use colored::Colorize;
use conductor_core::Config;
use conductor_orchestrator::{RefinementError, RefinementOutcome, Termination};
use std::path::Path;

/// Execute the refine command.
///
/// Prints the refined items, and writes them to `output` when given.
pub async fn execute(notes: &Path, output: Option<&Path>, config: &Config, json: bool) -> Result<()> {
    let meeting_notes = read_input(notes)?;
    let app = App::build(config)?;

    let outcome = match app.refinement().run(&meeting_notes).await {
        Ok(outcome) => outcome,
        Err(e) => {
            report_partial(&e);
            return Err(e).context("Refinement failed");
        }
    };

    if let Some(path) = output {
        let document = serde_json::to_string_pretty(&outcome.action_items)?;
        std::fs::write(path, document).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if json {
        return print_json(&outcome);
    }
    print_outcome(&outcome);
    Ok(())
}

fn report_partial(error: &RefinementError) {
    if let Some(last_good) = error.last_good() {
        eprintln!(
            "{} {} action item(s) were produced before the failure",
            "!".yellow(),
            last_good.len()
        );
    }
}

pub(crate) fn print_outcome(outcome: &RefinementOutcome) {
    let list = &outcome.action_items;
    println!("{}", "Action Items".bold().cyan());
    println!("  Meeting: {} ({})", list.meeting_title.bold(), list.meeting_date);
    println!();

    for (index, item) in list.action_items.iter().enumerate() {
        println!("  {}. {} [{}]", index + 1, item.title.bold(), item.priority);
        println!("      {}", item.description);
        println!(
            "      Assignee: {}  Due: {}",
            item.assignee.as_deref().unwrap_or("unassigned").cyan(),
            item.due_date
        );
    }
    println!();

    let stopped = match outcome.termination {
        Termination::Approved => "approved by review".green(),
        Termination::CycleDetected => "stopped on a repeated state".yellow(),
        Termination::MaxIterations => "stopped at the iteration limit".yellow(),
        Termination::EmptyRefinement => "kept after an empty refinement".yellow(),
    };
    println!("  {} after {} refinement(s), {} review(s)", stopped, outcome.iterations, outcome.reviews);
}
