//! Universal OpenAI-compatible oracle.
//!
//! Talks to any server implementing the OpenAI Chat Completions API (OpenAI
//! itself, vLLM, LocalAI, LM Studio, Ollama's compatible endpoints). Every
//! prompt is sent as a single user message.

use async_trait::async_trait;
use conductor_abstraction::{Oracle, OracleError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Default request timeout for oracle calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI-compatible chat completions oracle.
#[derive(Debug, Clone)]
pub struct UniversalOracle {
    /// The model identifier (e.g., "gpt-4o-mini").
    model_id: String,
    /// Base URL for the API endpoint (e.g., "https://api.openai.com/v1").
    base_url: String,
    /// Optional API key (some local servers don't require auth).
    api_key: Option<String>,
    /// Sampling temperature forwarded to the server.
    temperature: Option<f32>,
    client: Client,
}

impl UniversalOracle {
    /// Creates a new `UniversalOracle` with an explicit API key.
    ///
    /// # Arguments
    /// * `model_id` - The model identifier
    /// * `base_url` - The base URL for the API endpoint
    /// * `api_key` - The API key for authentication
    #[must_use]
    pub fn with_api_key(model_id: String, base_url: String, api_key: String) -> Self {
        Self::build(model_id, base_url, Some(api_key), DEFAULT_TIMEOUT)
    }

    /// Creates a new `UniversalOracle` without authentication.
    ///
    /// # Arguments
    /// * `model_id` - The model identifier
    /// * `base_url` - The base URL for the API endpoint
    #[must_use]
    pub fn without_auth(model_id: String, base_url: String) -> Self {
        Self::build(model_id, base_url, None, DEFAULT_TIMEOUT)
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self::build(self.model_id, self.base_url, self.api_key, timeout)
            .with_temperature(self.temperature)
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    fn build(model_id: String, base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            model_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: None,
            client: Client::builder().timeout(timeout).build().unwrap_or_else(|_| Client::new()),
        }
    }

    fn map_status(status: StatusCode, body: String) -> OracleError {
        match status.as_u16() {
            401 | 403 => {
                OracleError::Unsupported(format!("Authentication failed ({status}): {body}"))
            }
            429 => OracleError::ResponseError(format!("Rate limited ({status}): {body}")),
            500..=599 => OracleError::ResponseError(format!("Server error ({status}): {body}")),
            _ => OracleError::ResponseError(format!("API error ({status}): {body}")),
        }
    }
}

#[async_trait]
impl Oracle for UniversalOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        debug!(model_id = %self.model_id, prompt_len = prompt.len(), "UniversalOracle completing prompt");

        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: self.model_id.clone(),
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
            temperature: self.temperature,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to send request to oracle");
            OracleError::RequestError(format!("Network error: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, url = %url, "Oracle returned error status");
            return Err(Self::map_status(status, error_text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to parse oracle response");
            OracleError::SerializationError(format!("Failed to parse response: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| OracleError::ResponseError("No content in API response".to_string()))
    }

    fn oracle_id(&self) -> &str {
        &self.model_id
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let oracle = UniversalOracle::without_auth("m".to_string(), "http://localhost/v1/".to_string());
        assert_eq!(oracle.base_url, "http://localhost/v1");
        assert_eq!(oracle.oracle_id(), "m");
    }

    #[tokio::test]
    async fn test_complete_success() {
        let mut server = mockito::Server::new_async().await;
        let base_url = format!("{}/v1", server.url());

        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                "choices": [{
                    "message": {"role": "assistant", "content": "jira_agent"}
                }]
            }"#,
            )
            .create();

        let oracle =
            UniversalOracle::with_api_key("test-model".to_string(), base_url, "secret".to_string());
        let answer = oracle.complete("Which agent?").await.unwrap();

        assert_eq!(answer, "jira_agent");
        mock.assert();
    }

    #[tokio::test]
    async fn test_complete_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("invalid key")
            .create();

        let oracle = UniversalOracle::without_auth("m".to_string(), server.url());
        let result = oracle.complete("hi").await;

        assert!(matches!(result, Err(OracleError::Unsupported(_))));
        mock.assert();
    }

    #[tokio::test]
    async fn test_complete_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/chat/completions").with_status(503).create();

        let oracle = UniversalOracle::without_auth("m".to_string(), server.url());
        assert!(matches!(oracle.complete("hi").await, Err(OracleError::ResponseError(_))));
    }

    #[tokio::test]
    async fn test_complete_empty_choices() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": []}"#)
            .create();

        let oracle = UniversalOracle::without_auth("m".to_string(), server.url());
        assert!(matches!(oracle.complete("hi").await, Err(OracleError::ResponseError(_))));
    }

    #[tokio::test]
    async fn test_complete_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create();

        let oracle = UniversalOracle::without_auth("m".to_string(), server.url());
        assert!(matches!(oracle.complete("hi").await, Err(OracleError::SerializationError(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let oracle = UniversalOracle::without_auth("m".to_string(), "http://127.0.0.1:1".to_string())
            .with_timeout(Duration::from_secs(2));
        assert!(matches!(oracle.complete("hi").await, Err(OracleError::RequestError(_))));
    }
}
