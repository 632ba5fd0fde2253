//! HTTP calls to worker agents.
//!
//! Worker contract: `GET /description` answers with the capability text,
//! `POST /agent` takes `{query}` and answers
//! `{response, error, additional_info_required}`.

use crate::error::AgentCallError;
use conductor_core::AgentDescriptor;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

const BODY_EXCERPT_CHARS: usize = 200;

/// A worker agent's answer to a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    /// Answer text.
    pub response: String,
    /// The agent reported a failure.
    pub error: bool,
    /// The agent needs more information.
    pub additional_info_required: bool,
}

impl AgentReply {
    fn from_value(body: Value, agent: &str) -> Result<Self, AgentCallError> {
        let map = match body {
            Value::Object(map) => map,
            other => {
                return Err(AgentCallError::InvalidResponse {
                    agent: agent.to_string(),
                    message: format!("expected a JSON object, got {}", excerpt(&other.to_string())),
                });
            }
        };

        let response = match map.get("response") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => Value::Object(map.clone()).to_string(),
        };
        let flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);

        Ok(Self { response, error: flag("error"), additional_info_required: flag("additional_info_required") })
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(BODY_EXCERPT_CHARS).collect()
}

/// Client for the worker-agent HTTP contract.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    call_timeout: Duration,
    description_timeout: Duration,
}

impl AgentClient {
    /// Creates a client.
    ///
    /// # Arguments
    /// * `call_timeout` - Deadline for one `POST /agent` call, body included
    /// * `description_timeout` - Deadline for one `GET /description` call
    #[must_use]
    pub fn new(call_timeout: Duration, description_timeout: Duration) -> Self {
        Self { http: reqwest::Client::new(), call_timeout, description_timeout }
    }

    /// Sends `query` to `agent`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` or `Transport` when no answer arrives, `Status` for a
    /// non-2xx answer and `InvalidResponse` for a malformed body.
    pub async fn query(&self, agent: &AgentDescriptor, query: &str) -> Result<AgentReply, AgentCallError> {
        match tokio::time::timeout(self.call_timeout, self.send_query(agent, query)).await {
            Ok(result) => result,
            Err(_) => Err(AgentCallError::Timeout { agent: agent.agent_id.clone(), timeout: self.call_timeout }),
        }
    }

    async fn send_query(&self, agent: &AgentDescriptor, query: &str) -> Result<AgentReply, AgentCallError> {
        let url = format!("{}/agent", agent.endpoint.trim_end_matches('/'));
        debug!(agent_id = %agent.agent_id, url = %url, "Calling agent");

        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                AgentCallError::Timeout { agent: agent.agent_id.clone(), timeout: self.call_timeout }
            } else {
                AgentCallError::Transport { agent: agent.agent_id.clone(), message: e.to_string() }
            }
        };

        let response = self.http.post(&url).json(&json!({ "query": query })).send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(AgentCallError::Status {
                agent: agent.agent_id.clone(),
                status: status.as_u16(),
                body: excerpt(&text),
            });
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| AgentCallError::InvalidResponse {
            agent: agent.agent_id.clone(),
            message: e.to_string(),
        })?;
        AgentReply::from_value(body, &agent.agent_id)
    }

    /// Fetches an agent's live description.
    ///
    /// The body may be a JSON string or plain text. Returns `None` on any
    /// failure or an empty description.
    pub async fn description(&self, agent: &AgentDescriptor) -> Option<String> {
        let url = format!("{}/description", agent.endpoint.trim_end_matches('/'));
        let fetch = async {
            let response = self.http.get(&url).send().await?.error_for_status()?;
            response.text().await
        };

        let text = match tokio::time::timeout(self.description_timeout, fetch).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(agent_id = %agent.agent_id, error = %e, "Failed to fetch agent description");
                return None;
            }
            Err(_) => {
                warn!(agent_id = %agent.agent_id, "Timed out fetching agent description");
                return None;
            }
        };

        let description = serde_json::from_str::<String>(&text).unwrap_or(text);
        let description = description.trim();
        if description.is_empty() {
            warn!(agent_id = %agent.agent_id, "Agent returned an empty description");
            return None;
        }
        Some(description.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(url: &str) -> AgentDescriptor {
        AgentDescriptor::new("j1", "jira_agent", "tickets", url)
    }

    fn client() -> AgentClient {
        AgentClient::new(Duration::from_secs(5), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_query_parses_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/agent")
            .match_body(mockito::Matcher::PartialJsonString(r#"{"query": "do it"}"#.to_string()))
            .with_status(200)
            .with_body(r#"{"response": "done", "error": false, "additional_info_required": true}"#)
            .create();

        let reply = client().query(&agent(&server.url()), "do it").await.unwrap();
        assert_eq!(reply.response, "done");
        assert!(!reply.error);
        assert!(reply.additional_info_required);
        mock.assert();
    }

    #[tokio::test]
    async fn test_query_classifies_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/agent").with_status(503).with_body("overloaded").create();
        let err = client().query(&agent(&server.url()), "q").await.unwrap_err();
        assert!(matches!(err, AgentCallError::Status { status: 503, .. }));

        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/agent").with_status(200).with_body("not json").create();
        let err = client().query(&agent(&server.url()), "q").await.unwrap_err();
        assert!(matches!(err, AgentCallError::InvalidResponse { .. }));

        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/agent").with_status(200).with_body("[1, 2]").create();
        let err = client().query(&agent(&server.url()), "q").await.unwrap_err();
        assert!(matches!(err, AgentCallError::InvalidResponse { .. }));

        let err = client().query(&agent("http://127.0.0.1:1"), "q").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_reply_without_response_field_uses_body() {
        let reply = AgentReply::from_value(json!({"status": "ok"}), "a").unwrap();
        assert_eq!(reply.response, r#"{"status":"ok"}"#);
        assert!(!reply.error);
    }

    #[tokio::test]
    async fn test_description_accepts_json_string_and_text() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/description").with_status(200).with_body(r#""Creates Jira tickets""#).create();
        assert_eq!(client().description(&agent(&server.url())).await.as_deref(), Some("Creates Jira tickets"));

        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/description").with_status(200).with_body("Sends email\n").create();
        assert_eq!(client().description(&agent(&server.url())).await.as_deref(), Some("Sends email"));
    }

    #[tokio::test]
    async fn test_description_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/description").with_status(404).create();
        assert!(client().description(&agent(&server.url())).await.is_none());
        assert!(client().description(&agent("http://127.0.0.1:1")).await.is_none());
    }
}
