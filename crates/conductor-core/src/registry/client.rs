//! HTTP client for the agent registry service.
//!
//! The client shields callers from the network: every method returns a safe
//! default (`false`, empty, `None`) instead of an error. Writes are retried
//! on transport failures only; an HTTP error status is a definitive answer.

use super::AgentDescriptor;
use crate::config::ClientConfig;
use crate::resilience::{BackoffStrategy, ResilienceError, RetryExecutor, RetryPolicy};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
enum CallError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("registry answered {0}")]
    Status(StatusCode),
}

impl CallError {
    const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    agents: Vec<AgentDescriptor>,
}

/// Outcome of one heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// The registry refreshed the agent.
    Accepted,
    /// The registry answered that it does not know the agent.
    UnknownAgent,
    /// The registry was unreachable or failed.
    Failed,
}

/// Client for the registry HTTP API.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    endpoint: String,
    client: Client,
    write_policy: RetryPolicy,
    unregister_policy: RetryPolicy,
}

impl RegistryClient {
    /// Creates a client for the registry at `endpoint`.
    ///
    /// # Arguments
    /// * `endpoint` - Base URL of the registry service
    /// * `timeout` - Per-request timeout
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: Client::builder().timeout(timeout).build().unwrap_or_else(|_| Client::new()),
            write_policy: RetryPolicy {
                max_attempts: 3,
                strategy: BackoffStrategy::Exponential,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(10),
            },
            unregister_policy: RetryPolicy {
                max_attempts: 2,
                strategy: BackoffStrategy::Constant,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(1),
            },
        }
    }

    /// Creates a client from the `[client]` config section.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.registry_endpoint.clone(), config.request_timeout())
    }

    /// Replaces the retry policy used by `register` and `heartbeat`.
    ///
    /// `unregister` keeps two constant-delay attempts at the policy's base delay.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.write_policy = policy;
        self.unregister_policy.base_delay = policy.base_delay;
        self.unregister_policy.max_delay = policy.base_delay;
        self
    }

    /// Sets how many attempts `register` and `heartbeat` make on transport errors.
    #[must_use]
    pub const fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_policy.max_attempts = attempts;
        self
    }

    /// Returns the registry base URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn agent_url(&self, route: &str, agent_id: &str) -> String {
        format!("{}/{route}/{}", self.endpoint, urlencoding::encode(agent_id))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, CallError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(CallError::Status(status))
        }
    }

    fn retrying(&self, name: &str, policy: RetryPolicy) -> RetryExecutor<CallError> {
        RetryExecutor::new(name, policy).retry_if(CallError::is_transport)
    }

    /// Registers an agent.
    ///
    /// # Returns
    /// `true` once the registry accepted the descriptor
    pub async fn register(&self, descriptor: &AgentDescriptor) -> bool {
        let url = format!("{}/register", self.endpoint);
        let result = self
            .retrying("registry.register", self.write_policy)
            .execute(|| self.send(self.client.post(&url).json(descriptor)))
            .await;

        match result {
            Ok(_) => {
                info!(agent_id = %descriptor.agent_id, "Registered agent with registry");
                true
            }
            Err(e) => {
                warn!(agent_id = %descriptor.agent_id, error = %e, "Failed to register agent");
                false
            }
        }
    }

    /// Sends a heartbeat for an agent.
    ///
    /// # Returns
    /// `false` when the registry does not know the agent or cannot be reached
    pub async fn heartbeat(&self, agent_id: &str) -> bool {
        self.send_heartbeat(agent_id).await == HeartbeatStatus::Accepted
    }

    /// Sends a heartbeat and reports why it failed, if it did.
    pub async fn send_heartbeat(&self, agent_id: &str) -> HeartbeatStatus {
        let url = self.agent_url("heartbeat", agent_id);
        let result = self
            .retrying("registry.heartbeat", self.write_policy)
            .execute(|| self.send(self.client.post(&url)))
            .await;

        match result {
            Ok(_) => {
                debug!(agent_id = %agent_id, "Heartbeat accepted");
                HeartbeatStatus::Accepted
            }
            Err(ResilienceError::Inner(CallError::Status(StatusCode::NOT_FOUND))) => {
                warn!(agent_id = %agent_id, "Agent not found in registry");
                HeartbeatStatus::UnknownAgent
            }
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Heartbeat failed");
                HeartbeatStatus::Failed
            }
        }
    }

    /// Unregisters an agent. An agent the registry does not know counts as removed.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let url = self.agent_url("agents", agent_id);
        let result = self
            .retrying("registry.unregister", self.unregister_policy)
            .execute(|| self.send(self.client.delete(&url)))
            .await;

        match result {
            Ok(_) => {
                info!(agent_id = %agent_id, "Unregistered agent");
                true
            }
            Err(ResilienceError::Inner(CallError::Status(StatusCode::NOT_FOUND))) => {
                debug!(agent_id = %agent_id, "Agent already absent from registry");
                true
            }
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Failed to unregister agent");
                false
            }
        }
    }

    /// Lists active agents. Returns an empty list on any failure.
    pub async fn discover(&self) -> Vec<AgentDescriptor> {
        let url = format!("{}/discover", self.endpoint);
        let response = match self.send(self.client.get(&url)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to discover agents");
                return Vec::new();
            }
        };

        match response.json::<DiscoverResponse>().await {
            Ok(body) => {
                debug!(count = body.agents.len(), "Discovered agents");
                body.agents
            }
            Err(e) => {
                warn!(error = %e, "Unreadable discover response");
                Vec::new()
            }
        }
    }

    /// Fetches one agent's descriptor.
    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
        let url = self.agent_url("agents", agent_id);
        match self.send(self.client.get(&url)).await {
            Ok(response) => response
                .json()
                .await
                .map_err(|e| warn!(agent_id = %agent_id, error = %e, "Unreadable agent response"))
                .ok(),
            Err(CallError::Status(StatusCode::NOT_FOUND)) => None,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Failed to fetch agent");
                None
            }
        }
    }

    /// Fetches the registry's `/stats` body.
    pub async fn stats(&self) -> Option<Value> {
        let url = format!("{}/stats", self.endpoint);
        match self.send(self.client.get(&url)).await {
            Ok(response) => response.json().await.ok(),
            Err(e) => {
                warn!(error = %e, "Failed to fetch registry stats");
                None
            }
        }
    }

    /// Returns whether the registry reports itself healthy.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        match self.send(self.client.get(&url)).await {
            Ok(response) => response
                .json::<Value>()
                .await
                .is_ok_and(|body| body.get("status").and_then(Value::as_str) == Some("healthy")),
            Err(e) => {
                debug!(error = %e, "Registry health check failed");
                false
            }
        }
    }
}
