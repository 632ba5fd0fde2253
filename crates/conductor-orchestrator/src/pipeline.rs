//! Meeting notes to dispatched action items.

use crate::dispatch::DispatchOrchestrator;
use crate::error::Result;
use crate::refinement::{RefinementController, RefinementOutcome};
use crate::types::DispatchSummary;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

/// Refinement result plus the dispatch of its items.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// How the item set was produced.
    pub refinement: RefinementOutcome,
    /// What the agents answered.
    pub dispatch: DispatchSummary,
}

/// Refines action items from meeting notes and dispatches them.
#[derive(Debug, Clone)]
pub struct Pipeline {
    refinement: RefinementController,
    dispatch: DispatchOrchestrator,
}

impl Pipeline {
    /// Creates a pipeline from its two stages.
    #[must_use]
    pub const fn new(refinement: RefinementController, dispatch: DispatchOrchestrator) -> Self {
        Self { refinement, dispatch }
    }

    /// Runs refinement, then dispatches the resulting items.
    ///
    /// # Errors
    ///
    /// Returns `OrchestrationError::Refinement` when the refinement loop
    /// aborts; nothing is dispatched in that case.
    pub async fn run(&self, meeting_notes: &str, cancel: CancellationToken) -> Result<PipelineOutcome> {
        async {
            let refinement = self.refinement.run(meeting_notes).await?;
            info!(
                items = refinement.action_items.len(),
                termination = ?refinement.termination,
                "Dispatching refined action items"
            );

            let dispatch =
                self.dispatch.dispatch_with_cancel(&refinement.action_items.action_items, cancel).await;
            Ok(PipelineOutcome { refinement, dispatch })
        }
        .instrument(info_span!("pipeline"))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::AgentSource;
    use crate::error::OrchestrationError;
    use crate::refinement::Termination;
    use crate::types::{ActionItem, ActionItemsList};
    use conductor_core::config::{DispatchConfig, RefinementSettings};
    use conductor_core::registry::DEFAULT_AGENT_TTL;
    use conductor_core::{AgentRegistry, CircuitBreakerRegistry, MemoryStore};
    use conductor_models::ScriptedOracle;
    use std::sync::Arc;

    fn pipeline(oracle: Arc<ScriptedOracle>) -> Pipeline {
        let source: Arc<dyn AgentSource> = Arc::new(AgentRegistry::new(Arc::new(MemoryStore::new()), DEFAULT_AGENT_TTL));
        let config = DispatchConfig { fetch_live_descriptions: false, ..DispatchConfig::default() };
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.breaker_config()));
        let dispatch = DispatchOrchestrator::new(oracle.clone(), source, breakers, config);
        let refinement = RefinementController::new(oracle, &RefinementSettings::default());
        Pipeline::new(refinement, dispatch)
    }

    #[tokio::test]
    async fn test_pipeline_dispatches_refined_items() {
        let items = ActionItemsList::new(
            "Planning",
            vec![ActionItem::new("Draft roadmap", "Write Q3 roadmap"), ActionItem::new("Book venue", "Offsite")],
        );
        let oracle = Arc::new(ScriptedOracle::with_answers(
            "o",
            [serde_json::to_string(&items).unwrap(), r#"{"requires_changes": false, "feedback": "ok"}"#.to_string()],
        ));

        let outcome = pipeline(oracle).run("notes", CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.refinement.termination, Termination::Approved);
        assert_eq!(outcome.dispatch.total, 2);
        // No agents registered, so both items end unassigned.
        assert_eq!(outcome.dispatch.successful, 0);
        assert!(outcome.dispatch.results.iter().all(|r| r.agent_error && r.request_error));
    }

    #[tokio::test]
    async fn test_pipeline_stops_on_generation_failure() {
        let oracle = Arc::new(ScriptedOracle::new("o"));
        let err = pipeline(oracle).run("notes", CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Refinement(_)));
    }
}
