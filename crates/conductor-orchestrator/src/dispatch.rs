//! Parallel dispatch of action items to worker agents.
//!
//! Each item runs as its own task: route with the oracle, then call the chosen
//! agent through a retry executor wrapped around that agent's circuit breaker.
//! Every task sends exactly one [`ExecutionResult`] over a channel and the
//! orchestrator counts results until it holds one per item.

use crate::agent_client::{AgentClient, AgentReply};
use crate::error::AgentCallError;
use crate::prompts::{AGENT_QUERY_PROMPT, render};
use crate::routing::Router;
use crate::types::{ActionItem, DispatchSummary, ExecutionResult, RoutingDecision, UNASSIGNED_AGENT};
use async_trait::async_trait;
use conductor_abstraction::Oracle;
use conductor_core::config::DispatchConfig;
use conductor_core::{
    AgentDescriptor, AgentRegistry, CircuitBreakerRegistry, ResilienceError, RetryExecutor,
    RegistryClient,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Response text of an item no agent can take.
pub const UNASSIGNED_RESPONSE: &str = "No suitable agent found for this action item. Agent routing failed.";

/// Response text of an item whose dispatch was cancelled.
pub const CANCELLED_RESPONSE: &str = "cancelled";

/// Where the orchestrator finds agents.
#[async_trait]
pub trait AgentSource: Send + Sync {
    /// Lists the currently active agents.
    async fn discover(&self) -> Vec<AgentDescriptor>;
}

#[async_trait]
impl AgentSource for RegistryClient {
    async fn discover(&self) -> Vec<AgentDescriptor> {
        Self::discover(self).await
    }
}

#[async_trait]
impl AgentSource for AgentRegistry {
    async fn discover(&self) -> Vec<AgentDescriptor> {
        Self::discover(self).await
    }
}

impl ExecutionResult {
    fn failed(index: usize, item: ActionItem, agent_name: &str, request_error: bool, agent_error: bool, response: String) -> Self {
        Self {
            action_item_index: index,
            action_item: item,
            agent_name: agent_name.to_string(),
            request_error,
            agent_error,
            response,
            additional_info_required: false,
            execution_time: None,
        }
    }

    fn unassigned(index: usize, item: ActionItem) -> Self {
        Self::failed(index, item, UNASSIGNED_AGENT, true, true, UNASSIGNED_RESPONSE.to_string())
    }

    fn cancelled(index: usize, item: ActionItem, agent_name: &str) -> Self {
        Self::failed(index, item, agent_name, true, false, CANCELLED_RESPONSE.to_string())
    }
}

struct Inner {
    router: Router,
    source: Arc<dyn AgentSource>,
    breakers: Arc<CircuitBreakerRegistry>,
    client: AgentClient,
    config: DispatchConfig,
}

/// Routes and executes batches of action items.
#[derive(Clone)]
pub struct DispatchOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DispatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchOrchestrator")
            .field("router", &self.inner.router)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl DispatchOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Arguments
    /// * `oracle` - Routing oracle
    /// * `source` - Agent discovery
    /// * `breakers` - Breaker registry, one breaker per `agent_id`
    /// * `config` - Timeouts, breaker thresholds and retry policy
    #[must_use]
    pub fn new(
        oracle: Arc<dyn Oracle>,
        source: Arc<dyn AgentSource>,
        breakers: Arc<CircuitBreakerRegistry>,
        config: DispatchConfig,
    ) -> Self {
        let client = AgentClient::new(config.agent_timeout(), config.description_timeout());
        Self { inner: Arc::new(Inner { router: Router::new(oracle), source, breakers, client, config }) }
    }

    /// Returns the breaker registry.
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.inner.breakers
    }

    /// Discovers agents, replacing descriptions with live ones when enabled.
    ///
    /// Agents whose live description cannot be fetched are left out.
    pub async fn routable_agents(&self) -> Vec<AgentDescriptor> {
        let agents = self.inner.source.discover().await;
        if !self.inner.config.fetch_live_descriptions {
            return agents;
        }

        let mut fetches = JoinSet::new();
        for mut agent in agents {
            let client = self.inner.client.clone();
            fetches.spawn(async move {
                let description = client.description(&agent).await?;
                agent.description = description;
                Some(agent)
            });
        }

        let mut routable = Vec::new();
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok(Some(agent)) => routable.push(agent),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Description fetch task failed"),
            }
        }
        routable.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        routable
    }

    /// Dispatches every item and waits for all results.
    pub async fn dispatch(&self, items: &[ActionItem]) -> DispatchSummary {
        self.dispatch_with_cancel(items, CancellationToken::new()).await
    }

    /// Dispatches every item, stopping in-flight work when `cancel` fires.
    ///
    /// The summary always holds exactly one result per item; cancelled items
    /// report a `cancelled` request error.
    pub async fn dispatch_with_cancel(&self, items: &[ActionItem], cancel: CancellationToken) -> DispatchSummary {
        let dispatch_id = Uuid::new_v4();
        let span = info_span!("dispatch", %dispatch_id, items = items.len());
        self.run(items, cancel).instrument(span).await
    }

    async fn run(&self, items: &[ActionItem], cancel: CancellationToken) -> DispatchSummary {
        let total = items.len();
        if total == 0 {
            return DispatchSummary::from_results(Vec::new());
        }

        let agents = Arc::new(self.routable_agents().await);
        if agents.is_empty() {
            warn!("No agents available, every item is unassigned");
        } else {
            info!(agents = agents.len(), "Dispatching to discovered agents");
        }

        let (tx, mut rx) = mpsc::channel(total);
        for (index, item) in items.iter().enumerate() {
            let inner = Arc::clone(&self.inner);
            let agents = Arc::clone(&agents);
            let cancel = cancel.clone();
            let tx = tx.clone();
            let item = item.clone();

            tokio::spawn(
                async move {
                    let started = Instant::now();
                    let mut result = inner.process(index, item, &agents, &cancel).await;
                    result.execution_time = Some(started.elapsed().as_secs_f64());
                    if tx.send(result).await.is_err() {
                        debug!(index, "Result receiver dropped");
                    }
                }
                .in_current_span(),
            );
        }
        drop(tx);

        let mut slots: Vec<Option<ExecutionResult>> = vec![None; total];
        let mut received = 0;
        while received < total {
            let Some(result) = rx.recv().await else {
                break;
            };
            let index = result.action_item_index;
            match slots.get_mut(index) {
                Some(slot @ None) => {
                    *slot = Some(result);
                    received += 1;
                }
                _ => warn!(index, "Discarding unexpected result"),
            }
        }

        if received < total {
            error!(received, total, "Dispatch tasks ended without reporting");
        }

        let results: Vec<ExecutionResult> = slots
            .into_iter()
            .zip(items)
            .enumerate()
            .map(|(index, (slot, item))| {
                slot.unwrap_or_else(|| {
                    ExecutionResult::failed(
                        index,
                        item.clone(),
                        UNASSIGNED_AGENT,
                        true,
                        false,
                        "Dispatch task ended without a result".to_string(),
                    )
                })
            })
            .collect();

        let summary = DispatchSummary::from_results(results);
        info!(successful = summary.successful, total = summary.total, "Dispatch complete");
        summary
    }
}

impl Inner {
    async fn process(
        &self,
        index: usize,
        item: ActionItem,
        agents: &[AgentDescriptor],
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let decision = tokio::select! {
            biased;
            () = cancel.cancelled() => return ExecutionResult::cancelled(index, item, UNASSIGNED_AGENT),
            decision = self.router.route(index, &item, agents) => decision,
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(index, agent = %decision.agent_name, "Dispatch cancelled");
                ExecutionResult::cancelled(index, item.clone(), &decision.agent_name)
            }
            result = self.execute(index, &item, &decision, agents) => result,
        }
    }

    async fn execute(
        &self,
        index: usize,
        item: &ActionItem,
        decision: &RoutingDecision,
        agents: &[AgentDescriptor],
    ) -> ExecutionResult {
        if decision.is_unassigned() {
            return ExecutionResult::unassigned(index, item.clone());
        }

        let Some(agent) = agents.iter().find(|a| a.agent_id == decision.agent_name) else {
            return ExecutionResult::failed(
                index,
                item.clone(),
                &decision.agent_name,
                true,
                true,
                format!("No endpoint known for agent {}", decision.agent_name),
            );
        };

        let item_json = serde_json::to_string_pretty(item).unwrap_or_else(|_| item.title.clone());
        let query = render(AGENT_QUERY_PROMPT, &[("action_item", &item_json)]);

        let breaker = self.breakers.get_or_create_with(&agent.agent_id, self.config.breaker.breaker_config());
        let retry = RetryExecutor::new(format!("agent:{}", agent.agent_id), self.config.retry.retry_policy())
            .retry_if(|e: &ResilienceError<AgentCallError>| {
                matches!(e, ResilienceError::Inner(inner) if inner.is_retryable())
            });

        let outcome = retry
            .execute(|| breaker.call(|| self.client.query(agent, &query)))
            .await
            .map_err(|e| e.flatten());

        match outcome {
            Ok(reply) => success(index, item, agent, reply),
            Err(e) => failure(index, item, agent, &e),
        }
    }
}

fn success(index: usize, item: &ActionItem, agent: &AgentDescriptor, reply: AgentReply) -> ExecutionResult {
    if reply.error {
        warn!(index, agent_id = %agent.agent_id, "Agent reported an error");
    } else {
        info!(index, agent_id = %agent.agent_id, "Agent completed action item");
    }
    ExecutionResult {
        action_item_index: index,
        action_item: item.clone(),
        agent_name: agent.agent_id.clone(),
        request_error: false,
        agent_error: reply.error,
        response: reply.response,
        additional_info_required: reply.additional_info_required,
        execution_time: None,
    }
}

fn failure(
    index: usize,
    item: &ActionItem,
    agent: &AgentDescriptor,
    err: &ResilienceError<AgentCallError>,
) -> ExecutionResult {
    let agent_reported = err.inner().is_some_and(AgentCallError::is_agent_reported);
    match err.inner() {
        Some(call_error) => {
            let report = call_error.report().with_context("action_item_index", index);
            error!(agent_id = %agent.agent_id, report = %report, "Agent execution failed");
        }
        None => warn!(index, agent_id = %agent.agent_id, error = %err, "Agent call rejected"),
    }
    ExecutionResult::failed(
        index,
        item.clone(),
        &agent.agent_id,
        !agent_reported,
        agent_reported,
        format!("Agent execution failed: {err}"),
    )
}
