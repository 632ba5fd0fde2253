//! Data types exchanged between refinement, routing and dispatch.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Sentinel agent name for items no agent can take.
pub const UNASSIGNED_AGENT: &str = "UNASSIGNED_AGENT";

/// Sentinel for unknown dates.
pub const TBD: &str = "TBD";

/// Action item priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// High priority.
    High,
    /// Urgent.
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

fn default_tbd() -> String {
    TBD.to_string()
}

fn tbd_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_tbd))
}

fn default_category() -> String {
    "general".to_string()
}

/// A single unit of work extracted from meeting notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    /// Brief title.
    pub title: String,
    /// What needs to be done.
    pub description: String,
    /// Responsible person.
    #[serde(default)]
    pub assignee: Option<String>,
    /// ISO date or `TBD`.
    #[serde(default = "default_tbd", deserialize_with = "tbd_if_null")]
    pub due_date: String,
    /// Priority level.
    #[serde(default)]
    pub priority: Priority,
    /// Free-form category.
    #[serde(default = "default_category")]
    pub category: String,
    /// Identifiers of items this one depends on, in order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Estimated time or effort.
    #[serde(default)]
    pub estimated_effort: Option<String>,
}

impl ActionItem {
    /// Creates an item with default priority, category and due date.
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            assignee: None,
            due_date: default_tbd(),
            priority: Priority::default(),
            category: default_category(),
            dependencies: Vec::new(),
            estimated_effort: None,
        }
    }
}

/// The action items extracted from one meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItemsList {
    /// Meeting title or subject.
    #[serde(default)]
    pub meeting_title: String,
    /// ISO date or `TBD`.
    #[serde(default = "default_tbd", deserialize_with = "tbd_if_null")]
    pub meeting_date: String,
    /// Extracted items.
    #[serde(default)]
    pub action_items: Vec<ActionItem>,
    /// Short meeting summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Meeting participants.
    #[serde(default)]
    pub participants: Vec<String>,
    /// Follow-up meeting date.
    #[serde(default)]
    pub next_meeting_date: Option<String>,
}

impl ActionItemsList {
    /// Creates a list with the given title and items.
    #[must_use]
    pub fn new(meeting_title: impl Into<String>, action_items: Vec<ActionItem>) -> Self {
        Self {
            meeting_title: meeting_title.into(),
            meeting_date: default_tbd(),
            action_items,
            summary: None,
            participants: Vec::new(),
            next_meeting_date: None,
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.action_items.len()
    }

    /// Returns true when the list holds no items.
    pub fn is_empty(&self) -> bool {
        self.action_items.is_empty()
    }
}

/// Reviewer verdict on a list of action items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    /// Whether another refinement round is needed.
    pub requires_changes: bool,
    /// What to improve, or why nothing needs to change.
    pub feedback: String,
    /// Indices of accepted items.
    #[serde(default)]
    pub approved_items: Vec<usize>,
    /// Indices of rejected items.
    #[serde(default)]
    pub rejected_items: Vec<usize>,
}

/// The agent chosen for one action item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Index of the item in its batch.
    pub action_item_index: usize,
    /// Resolved `agent_id`, or [`UNASSIGNED_AGENT`].
    pub agent_name: String,
    /// Why this agent was chosen, or why none was.
    pub routing_reason: String,
    /// Whether a human should confirm before execution.
    #[serde(default)]
    pub requires_human_approval: bool,
}

impl RoutingDecision {
    /// Creates a decision that no agent takes the item.
    #[must_use]
    pub fn unassigned(action_item_index: usize, routing_reason: impl Into<String>) -> Self {
        Self {
            action_item_index,
            agent_name: UNASSIGNED_AGENT.to_string(),
            routing_reason: routing_reason.into(),
            requires_human_approval: false,
        }
    }

    /// Returns true when no agent was resolved.
    pub fn is_unassigned(&self) -> bool {
        self.agent_name == UNASSIGNED_AGENT
    }
}

/// Outcome of executing one action item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Index of the item in its batch.
    pub action_item_index: usize,
    /// The item that was executed.
    pub action_item: ActionItem,
    /// Agent that handled the item, or [`UNASSIGNED_AGENT`].
    pub agent_name: String,
    /// The call did not complete (transport, timeout, open circuit, cancellation).
    pub request_error: bool,
    /// The agent reported a failure or answered with an error status.
    pub agent_error: bool,
    /// Agent answer or failure explanation.
    pub response: String,
    /// The agent needs more information to proceed.
    #[serde(default)]
    pub additional_info_required: bool,
    /// Wall-clock seconds spent on the item.
    #[serde(default)]
    pub execution_time: Option<f64>,
}

impl ExecutionResult {
    /// Returns true when neither the request nor the agent failed.
    pub const fn is_success(&self) -> bool {
        !self.request_error && !self.agent_error
    }
}

/// Aggregate of one dispatch run, ordered by item index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Number of items dispatched.
    pub total: usize,
    /// Number of successful results.
    pub successful: usize,
    /// One result per item.
    pub results: Vec<ExecutionResult>,
}

impl DispatchSummary {
    /// Builds a summary, sorting results by index.
    #[must_use]
    pub fn from_results(mut results: Vec<ExecutionResult>) -> Self {
        results.sort_by_key(|r| r.action_item_index);
        let successful = results.iter().filter(|r| r.is_success()).count();
        Self { total: results.len(), successful, results }
    }

    /// Number of failed results.
    pub const fn failed(&self) -> usize {
        self.total - self.successful
    }
}
