//! Generate, review and refine loop for action items.
//!
//! The loop stops when the reviewer approves, when the item set repeats one of
//! the last `history_window` states, when `max_iterations` refinements have
//! run, or when a refinement comes back empty. Every stop returns the last
//! good item set.

use crate::error::RefinementError;
use crate::prompts::{ACTION_ITEMS_SCHEMA, GENERATION_PROMPT, REFINEMENT_PROMPT, REVIEW_PROMPT, REVIEW_SCHEMA, render};
use crate::types::{ActionItemsList, ReviewFeedback};
use chrono::Local;
use conductor_abstraction::{Oracle, OracleError, structured};
use conductor_core::config::RefinementSettings;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The reviewer required no changes.
    Approved,
    /// A refinement reproduced a recent state.
    CycleDetected,
    /// The refinement budget ran out.
    MaxIterations,
    /// A refinement returned no items; the previous set was kept.
    EmptyRefinement,
}

/// Result of a refinement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    /// The final item set.
    pub action_items: ActionItemsList,
    /// Why the loop stopped.
    pub termination: Termination,
    /// Refinements performed.
    pub iterations: u32,
    /// Reviews performed.
    pub reviews: u32,
    /// The last review, if any ran.
    pub last_feedback: Option<ReviewFeedback>,
}

/// Bounded ring of canonical serializations of recent item sets.
#[derive(Debug)]
struct StateHistory {
    window: usize,
    states: VecDeque<String>,
}

impl StateHistory {
    fn new(window: usize) -> Self {
        Self { window: window.max(1), states: VecDeque::with_capacity(window.max(1)) }
    }

    /// Records `items`; returns false when they match a state still in the window.
    fn record(&mut self, items: &ActionItemsList) -> bool {
        let canonical = serde_json::to_string(items).unwrap_or_default();
        if self.states.contains(&canonical) {
            return false;
        }
        if self.states.len() == self.window {
            self.states.pop_front();
        }
        self.states.push_back(canonical);
        true
    }
}

/// Drives the generate, review and refine loop.
#[derive(Clone)]
pub struct RefinementController {
    oracle: Arc<dyn Oracle>,
    max_iterations: u32,
    history_window: usize,
}

impl std::fmt::Debug for RefinementController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementController")
            .field("oracle", &self.oracle.oracle_id())
            .field("max_iterations", &self.max_iterations)
            .field("history_window", &self.history_window)
            .finish()
    }
}

impl RefinementController {
    /// Creates a controller with the configured bounds.
    #[must_use]
    pub fn new(oracle: Arc<dyn Oracle>, settings: &RefinementSettings) -> Self {
        Self { oracle, max_iterations: settings.max_iterations, history_window: settings.history_window }
    }

    /// Generates action items from meeting notes and refines them.
    ///
    /// # Errors
    ///
    /// Returns a `RefinementError` when an oracle call fails; review and
    /// refinement failures carry the last good item set.
    pub async fn run(&self, meeting_notes: &str) -> Result<RefinementOutcome, RefinementError> {
        let generated = self.generate(meeting_notes).await?;
        info!(items = generated.len(), "Generated action items");
        self.refine(generated, meeting_notes).await
    }

    /// Reviews and refines an existing item set.
    ///
    /// # Errors
    ///
    /// See [`RefinementController::run`].
    pub async fn refine(
        &self,
        mut current: ActionItemsList,
        meeting_notes: &str,
    ) -> Result<RefinementOutcome, RefinementError> {
        let mut history = StateHistory::new(self.history_window);
        let mut iterations = 0;
        let mut reviews = 0;
        let mut last_feedback = None;

        loop {
            if !history.record(&current) {
                warn!(iteration = iterations, "Action items repeat a recent state, stopping");
                return Ok(finish(current, Termination::CycleDetected, iterations, reviews, last_feedback));
            }

            let feedback = match self.review(&current, meeting_notes).await {
                Ok(feedback) => feedback,
                Err(source) => {
                    return Err(RefinementError::Review { iteration: iterations, source, last_good: Box::new(current) });
                }
            };
            reviews += 1;

            if !feedback.requires_changes {
                return Ok(finish(current, Termination::Approved, iterations, reviews, Some(feedback)));
            }
            debug!(feedback = %feedback.feedback, "Review requires changes");

            if iterations >= self.max_iterations {
                warn!(max_iterations = self.max_iterations, "Refinement budget exhausted");
                return Ok(finish(current, Termination::MaxIterations, iterations, reviews, Some(feedback)));
            }
            iterations += 1;

            let refined = match self.refine_once(&current, &feedback).await {
                Ok(refined) => refined,
                Err(source) => {
                    return Err(RefinementError::Refinement { iteration: iterations, source, last_good: Box::new(current) });
                }
            };
            last_feedback = Some(feedback);

            if refined.is_empty() {
                warn!(iteration = iterations, "Refinement returned no action items, keeping previous set");
                return Ok(finish(current, Termination::EmptyRefinement, iterations, reviews, last_feedback));
            }
            info!(iteration = iterations, items = refined.len(), "Refined action items");
            current = refined;
        }
    }

    async fn generate(&self, meeting_notes: &str) -> Result<ActionItemsList, RefinementError> {
        let prompt = render(
            GENERATION_PROMPT,
            &[("meeting_notes", meeting_notes), ("current_datetime", &current_datetime())],
        );
        structured(self.oracle.as_ref(), &prompt, ACTION_ITEMS_SCHEMA)
            .await
            .map_err(|source| RefinementError::Generation { source })
    }

    async fn review(
        &self,
        items: &ActionItemsList,
        meeting_notes: &str,
    ) -> Result<ReviewFeedback, OracleError> {
        let items_json = serde_json::to_string_pretty(items).unwrap_or_default();
        let prompt = render(
            REVIEW_PROMPT,
            &[
                ("action_items", &items_json),
                ("meeting_notes", meeting_notes),
                ("current_datetime", &current_datetime()),
            ],
        );
        structured(self.oracle.as_ref(), &prompt, REVIEW_SCHEMA).await
    }

    async fn refine_once(
        &self,
        items: &ActionItemsList,
        feedback: &ReviewFeedback,
    ) -> Result<ActionItemsList, OracleError> {
        let items_json = serde_json::to_string_pretty(items).unwrap_or_default();
        let prompt = render(REFINEMENT_PROMPT, &[("action_items", &items_json), ("review", &feedback.feedback)]);
        structured(self.oracle.as_ref(), &prompt, ACTION_ITEMS_SCHEMA).await
    }
}

fn finish(
    action_items: ActionItemsList,
    termination: Termination,
    iterations: u32,
    reviews: u32,
    last_feedback: Option<ReviewFeedback>,
) -> RefinementOutcome {
    info!(?termination, iterations, reviews, items = action_items.len(), "Refinement finished");
    RefinementOutcome { action_items, termination, iterations, reviews, last_feedback }
}

fn current_datetime() -> String {
    Local::now().format("%A, %B %d, %Y at %I:%M %p").to_string()
}
