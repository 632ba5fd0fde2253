//! Dispatch command implementation.

use super::{print_dispatch_summary, print_json, read_input};
use crate::app::App;
use anyhow::{Context, Result};
use conductor_core::Config;
use conductor_orchestrator::{ActionItem, ActionItemsList};
use serde::Deserialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Accepted shapes of the items document.
#[derive(Deserialize)]
#[serde(untagged)]
enum ItemsDocument {
    List(ActionItemsList),
    Items(Vec<ActionItem>),
}

impl ItemsDocument {
    fn into_items(self) -> Vec<ActionItem> {
        match self {
            Self::List(list) => list.action_items,
            Self::Items(items) => items,
        }
    }
}

pub(crate) fn parse_items(text: &str) -> Result<Vec<ActionItem>> {
    let document: ItemsDocument = serde_json::from_str(text)
        .context("Expected an action-items document or an array of action items")?;
    Ok(document.into_items())
}

/// Cancels `token` on Ctrl-C.
pub(crate) fn cancel_on_interrupt(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling dispatch");
            token.cancel();
        }
    });
}

/// Execute the dispatch command.
pub async fn execute(items_path: &Path, config: &Config, json: bool) -> Result<()> {
    let items = parse_items(&read_input(items_path)?)?;
    let app = App::build(config)?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);
    let summary = app.dispatcher().dispatch_with_cancel(&items, cancel).await;

    if json {
        return print_json(&summary);
    }
    print_dispatch_summary(&summary);
    Ok(())
}
