//! Oracle-driven agent routing.
//!
//! The oracle answers with an agent name (plain text, or a JSON object with
//! `agent_name`). The answer is resolved against the discovered descriptors:
//! an exact case-insensitive name match wins; otherwise the shortest name that
//! contains the answer or is contained in it, ties broken by `agent_id`.
//! Anything else routes to [`UNASSIGNED_AGENT`].

use crate::prompts::{ROUTING_CONTEXT, ROUTING_PROMPT, render};
use crate::types::{ActionItem, RoutingDecision, UNASSIGNED_AGENT};
use conductor_abstraction::{Oracle, extract_json_object};
use conductor_core::AgentDescriptor;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct RoutingAnswer {
    agent_name: String,
    #[serde(default)]
    routing_reason: Option<String>,
    #[serde(default)]
    requires_human_approval: bool,
}

/// Resolves an oracle answer to one of `agents`.
///
/// # Returns
/// The matching descriptor, or `None` for the sentinel, an empty answer or no match
pub fn resolve_agent<'a>(agents: &'a [AgentDescriptor], answer: &str) -> Option<&'a AgentDescriptor> {
    let wanted = answer.trim().trim_matches(|c| matches!(c, '"' | '\'' | '`')).trim().to_lowercase();
    if wanted.is_empty() || wanted == UNASSIGNED_AGENT.to_lowercase() {
        return None;
    }

    let exact = agents
        .iter()
        .filter(|a| a.name.to_lowercase() == wanted)
        .min_by(|a, b| a.agent_id.cmp(&b.agent_id));
    if exact.is_some() {
        return exact;
    }

    agents
        .iter()
        .filter(|a| {
            let name = a.name.to_lowercase();
            !name.is_empty() && (name.contains(&wanted) || wanted.contains(&name))
        })
        .min_by(|a, b| a.name.len().cmp(&b.name.len()).then_with(|| a.agent_id.cmp(&b.agent_id)))
}

/// Formats the agent list shown to the oracle, one `name: description` per line.
pub fn agents_list(agents: &[AgentDescriptor]) -> String {
    agents.iter().map(|a| format!("{}: {}", a.name, a.description)).collect::<Vec<_>>().join("\n")
}

/// Asks the oracle which agent should take an item.
#[derive(Clone)]
pub struct Router {
    oracle: Arc<dyn Oracle>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("oracle", &self.oracle.oracle_id()).finish()
    }
}

impl Router {
    /// Creates a router backed by `oracle`.
    #[must_use]
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Routes one item.
    ///
    /// Never fails: an oracle error or an unresolvable answer yields an
    /// unassigned decision whose reason says why.
    pub async fn route(&self, index: usize, item: &ActionItem, agents: &[AgentDescriptor]) -> RoutingDecision {
        if agents.is_empty() {
            return RoutingDecision::unassigned(index, "No agents available");
        }

        let item_json = serde_json::to_string_pretty(item).unwrap_or_else(|_| item.title.clone());
        let list = agents_list(agents);
        let prompt = format!(
            "{ROUTING_CONTEXT}\n\n{}",
            render(ROUTING_PROMPT, &[("action_item", &item_json), ("agents_list", &list)])
        );

        let answer = match self.oracle.complete(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(index, error = %e, "Routing oracle failed");
                return RoutingDecision::unassigned(index, format!("Error during routing: {e}"));
            }
        };

        let (name, reason, requires_human_approval) = parse_answer(&answer);
        debug!(index, answer = %name, "Routing answer");

        match resolve_agent(agents, &name) {
            Some(agent) => {
                info!(index, title = %item.title, agent_id = %agent.agent_id, agent_name = %agent.name, "Routed action item");
                RoutingDecision {
                    action_item_index: index,
                    agent_name: agent.agent_id.clone(),
                    routing_reason: reason.unwrap_or_else(|| format!("Matched agent '{}'", agent.name)),
                    requires_human_approval,
                }
            }
            None => {
                warn!(index, title = %item.title, answer = %name, "No agent matches routing answer");
                let reason = if name.trim() == UNASSIGNED_AGENT {
                    reason.unwrap_or_else(|| "No suitable agent".to_string())
                } else {
                    format!("Suggested agent '{}' not found", name.trim())
                };
                RoutingDecision::unassigned(index, reason)
            }
        }
    }
}

fn parse_answer(answer: &str) -> (String, Option<String>, bool) {
    if let Some(parsed) =
        extract_json_object(answer).and_then(|json| serde_json::from_str::<RoutingAnswer>(json).ok())
    {
        return (parsed.agent_name, parsed.routing_reason, parsed.requires_human_approval);
    }
    let first_line = answer.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
    (first_line.to_string(), None, false)
}
