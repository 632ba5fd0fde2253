//! Oracle abstraction layer for Conductor.
//!
//! An oracle is the opaque text-generation collaborator used for routing,
//! generation and review. This crate defines the trait every oracle implements
//! and a helper for asking an oracle for a typed, JSON-shaped answer.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Represents an error that can occur when talking to an oracle.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleError {
    /// The request could not be delivered (network issues, timeouts).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The oracle answered with an error status or an empty answer.
    #[error("Oracle Response Error: {0}")]
    ResponseError(String),

    /// The answer could not be turned into the requested shape.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The oracle kind is not supported or not configured.
    #[error("Unsupported Oracle: {0}")]
    Unsupported(String),

    /// Other unexpected errors.
    #[error("Other Oracle Error: {0}")]
    Other(String),
}

/// A trait for text oracles.
///
/// All oracles must be `Send + Sync` so a single instance can be shared
/// across concurrently dispatched items.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Completes a single prompt and returns the raw text answer.
    ///
    /// # Arguments
    /// * `prompt` - The full prompt text
    ///
    /// # Errors
    /// Returns an `OracleError` if the oracle cannot produce an answer.
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;

    /// Returns the identifier of the oracle (model name or mock id).
    fn oracle_id(&self) -> &str;
}

/// Appends JSON output instructions for the given schema to a prompt.
#[must_use]
pub fn with_schema_instructions(prompt: &str, schema: &str) -> String {
    format!(
        "{prompt}\n\nRespond with a single JSON object only, no prose and no code fences. \
         The object must follow this schema:\n{schema}"
    )
}

/// Extracts the outermost JSON object from free-form oracle text.
///
/// Returns the slice from the first `{` to the last `}`, or `None` when the
/// text holds no such span.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Asks the oracle for an answer shaped like `T`.
///
/// Schema instructions are appended to the prompt, the first JSON object in
/// the answer is extracted and deserialized.
///
/// # Arguments
/// * `oracle` - The oracle to ask
/// * `prompt` - The task prompt
/// * `schema` - A human-readable description of the expected JSON fields
///
/// # Errors
/// Returns the oracle's own error, or `OracleError::SerializationError` when
/// the answer holds no parseable object of the requested shape.
pub async fn structured<T: DeserializeOwned>(
    oracle: &dyn Oracle,
    prompt: &str,
    schema: &str,
) -> Result<T, OracleError> {
    let full_prompt = with_schema_instructions(prompt, schema);
    let answer = oracle.complete(&full_prompt).await?;

    let json = extract_json_object(&answer).ok_or_else(|| {
        OracleError::SerializationError(format!(
            "No JSON object in answer from oracle '{}'",
            oracle.oracle_id()
        ))
    })?;

    debug!(oracle_id = %oracle.oracle_id(), json_len = json.len(), "Parsing structured answer");

    serde_json::from_str(json)
        .map_err(|e| OracleError::SerializationError(format!("Failed to parse answer: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(String);

    #[async_trait]
    impl Oracle for Echo {
        async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
            Ok(self.0.clone())
        }

        fn oracle_id(&self) -> &str {
            "echo"
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        requires_changes: bool,
        feedback: String,
    }

    #[test]
    fn test_extract_json_object_with_fences() {
        let text = "Sure!\n```json\n{\"a\": {\"b\": 1}}\n```\nDone.";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn test_extract_json_object_absent() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_schema_instructions_keep_prompt() {
        let prompt = with_schema_instructions("Review this", "{\"ok\": bool}");
        assert!(prompt.starts_with("Review this"));
        assert!(prompt.contains("{\"ok\": bool}"));
    }

    #[tokio::test]
    async fn test_structured_parses_embedded_object() {
        let oracle = Echo(
            "Here you go: {\"requires_changes\": false, \"feedback\": \"fine\"} thanks".to_string(),
        );
        let verdict: Verdict = structured(&oracle, "review", "{}").await.unwrap();
        assert_eq!(
            verdict,
            Verdict { requires_changes: false, feedback: "fine".to_string() }
        );
    }

    #[tokio::test]
    async fn test_structured_rejects_prose() {
        let oracle = Echo("I cannot answer that".to_string());
        let result: Result<Verdict, _> = structured(&oracle, "review", "{}").await;
        assert!(matches!(result, Err(OracleError::SerializationError(_))));
    }

    #[tokio::test]
    async fn test_structured_rejects_wrong_shape() {
        let oracle = Echo("{\"unexpected\": 1}".to_string());
        let result: Result<Verdict, _> = structured(&oracle, "review", "{}").await;
        assert!(matches!(result, Err(OracleError::SerializationError(_))));
    }
}
