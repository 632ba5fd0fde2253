//! Prompt templates for generation, review, refinement, routing and agent queries.
//!
//! Templates use `{name}` placeholders filled by [`render`].

/// Generation prompt. Placeholders: `meeting_notes`, `current_datetime`.
pub const GENERATION_PROMPT: &str = "\
## ROLE
You are a productivity assistant that turns meeting notes into clear, actionable tasks.

## INSTRUCTIONS
1. Extract every task, commitment and responsibility from the notes.
2. For each action item give the owner as \"assignee\" and the deadline as \"due_date\". \
Use \"TBD\" when either is not stated.
3. Write dates as YYYY-MM-DD.
4. Add the context from the notes needed to understand each item.

The current date and time is {current_datetime}.

**--- MEETING NOTES START ---**
{meeting_notes}
**--- MEETING NOTES END ---**";

/// Review prompt. Placeholders: `action_items`, `meeting_notes`, `current_datetime`.
pub const REVIEW_PROMPT: &str = "\
You are reviewing action items for quality and completeness.

ACTION ITEMS TO REVIEW:
{action_items}

ORIGINAL MEETING NOTES:
{meeting_notes}

The current date and time is {current_datetime}.

Decide whether the action items need changes. Check that:
1. Every item is clear and actionable.
2. Owners and due dates are given where the notes state them.
3. No action item from the notes is missing.
4. Large tasks are broken down into manageable items.";

/// Refinement prompt. Placeholders: `action_items`, `review`.
pub const REFINEMENT_PROMPT: &str = "\
Refine the action items below according to the review feedback. Keep the same JSON structure.

CURRENT ACTION ITEMS:
{action_items}

REVIEW FEEDBACK:
{review}";

/// Routing instructions prepended to [`ROUTING_PROMPT`].
pub const ROUTING_CONTEXT: &str = "\
You are an action item dispatcher. You receive one action item and a list of available agents \
and route the item to the single most suitable agent.

Base the decision only on capabilities stated in each agent's description. \
Answer with the agent's exact name and nothing else. \
If no agent clearly matches, or the item is ambiguous, answer with UNASSIGNED_AGENT.";

/// Routing prompt. Placeholders: `action_item`, `agents_list`.
pub const ROUTING_PROMPT: &str = "\
Choose the agent that should handle this action item.

**--- ACTION ITEM START ---**
{action_item}
**--- ACTION ITEM END ---**
**--- AGENT LIST START ---**
{agents_list}
**--- AGENT LIST END ---**";

/// Query sent to a worker agent. Placeholder: `action_item`.
pub const AGENT_QUERY_PROMPT: &str = "\
Using the context and fields in the following json please preform the required actions:
**--- JSON START ---**
{action_item}
**--- JSON END ---**";

/// JSON field listing appended to generation and refinement prompts.
pub const ACTION_ITEMS_SCHEMA: &str = r#"{
  "meeting_title": string,
  "meeting_date": "YYYY-MM-DD" or "TBD",
  "action_items": [{
    "title": string,
    "description": string,
    "assignee": string or null,
    "due_date": "YYYY-MM-DD" or "TBD",
    "priority": "low" | "medium" | "high" | "urgent",
    "category": string,
    "dependencies": [string],
    "estimated_effort": string or null
  }],
  "summary": string or null,
  "participants": [string],
  "next_meeting_date": string or null
}"#;

/// JSON field listing appended to the review prompt.
pub const REVIEW_SCHEMA: &str = r#"{
  "requires_changes": boolean,
  "feedback": string,
  "approved_items": [integer],
  "rejected_items": [integer]
}"#;

/// Fills `{name}` placeholders with the given values.
///
/// Placeholders without a value are left untouched.
#[must_use]
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}
