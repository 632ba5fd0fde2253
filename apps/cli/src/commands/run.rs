//! Run command: refine from meeting notes, then dispatch.

use super::dispatch::cancel_on_interrupt;
use super::refine::print_outcome;
use super::{print_dispatch_summary, print_json, read_input};
use crate::app::App;
use anyhow::{Context, Result};
use conductor_core::Config;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Execute the run command.
pub async fn execute(notes: &Path, config: &Config, json: bool) -> Result<()> {
    let meeting_notes = read_input(notes)?;
    let app = App::build(config)?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);
    let outcome = app.pipeline().run(&meeting_notes, cancel).await.context("Pipeline failed")?;

    if json {
        return print_json(&outcome);
    }
    print_outcome(&outcome.refinement);
    println!();
    print_dispatch_summary(&outcome.dispatch);
    Ok(())
}
