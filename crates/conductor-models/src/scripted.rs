//! Scripted oracle with canned answers.
//!
//! Answers come from three places, checked in order: a queue of one-shot
//! answers, rules matching a substring of the prompt, and a fallback answer.
//! Every prompt is recorded so tests can assert on what was asked.

use async_trait::async_trait;
use conductor_abstraction::{Oracle, OracleError};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

/// A canned answer returned when the prompt contains `contains`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptRule {
    /// Substring to look for in the prompt.
    pub contains: String,
    /// Answer returned on a match.
    pub answer: String,
}

#[derive(Debug, Default, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    fallback: Option<String>,
    #[serde(default)]
    rules: Vec<ScriptRule>,
}

/// An oracle that plays back scripted answers.
#[derive(Debug)]
pub struct ScriptedOracle {
    id: String,
    queue: Mutex<VecDeque<Result<String, OracleError>>>,
    rules: Vec<ScriptRule>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    /// Creates an empty scripted oracle.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queue: Mutex::new(VecDeque::new()),
            rules: Vec::new(),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Creates a scripted oracle whose answers are consumed in order.
    #[must_use]
    pub fn with_answers<I, S>(id: impl Into<String>, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let oracle = Self::new(id);
        let queue = answers.into_iter().map(|a| Ok(a.into())).collect();
        Self { queue: Mutex::new(queue), ..oracle }
    }

    /// Adds a rule answering prompts that contain `contains`.
    #[must_use]
    pub fn with_rule(mut self, contains: impl Into<String>, answer: impl Into<String>) -> Self {
        self.rules.push(ScriptRule { contains: contains.into(), answer: answer.into() });
        self
    }

    /// Sets the answer used when nothing else matches.
    #[must_use]
    pub fn with_fallback(mut self, answer: impl Into<String>) -> Self {
        self.fallback = Some(answer.into());
        self
    }

    /// Loads rules and fallback from a TOML script file.
    ///
    /// ```toml
    /// fallback = "{}"
    ///
    /// [[rules]]
    /// contains = "Review"
    /// answer = '{"requires_changes": false, "feedback": "ok"}'
    /// ```
    ///
    /// # Errors
    /// Returns `OracleError::Unsupported` if the file cannot be read or parsed.
    pub fn from_toml_file(id: impl Into<String>, path: &Path) -> Result<Self, OracleError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OracleError::Unsupported(format!("Cannot read script {}: {e}", path.display()))
        })?;
        let script: ScriptFile = toml::from_str(&content).map_err(|e| {
            OracleError::Unsupported(format!("Invalid script {}: {e}", path.display()))
        })?;

        let mut oracle = Self::new(id);
        oracle.rules = script.rules;
        oracle.fallback = script.fallback;
        Ok(oracle)
    }

    /// Queues a one-shot answer.
    pub async fn push_answer(&self, answer: impl Into<String>) {
        self.queue.lock().await.push_back(Ok(answer.into()));
    }

    /// Queues a one-shot failure.
    pub async fn push_error(&self, error: OracleError) {
        self.queue.lock().await.push_back(Err(error));
    }

    /// Returns every prompt seen so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    /// Returns the number of prompts seen so far.
    pub async fn call_count(&self) -> usize {
        self.prompts.lock().await.len()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        self.prompts.lock().await.push(prompt.to_string());

        if let Some(next) = self.queue.lock().await.pop_front() {
            debug!(oracle_id = %self.id, "ScriptedOracle answering from queue");
            return next;
        }

        if let Some(rule) = self.rules.iter().find(|r| prompt.contains(&r.contains)) {
            debug!(oracle_id = %self.id, rule = %rule.contains, "ScriptedOracle answering from rule");
            return Ok(rule.answer.clone());
        }

        self.fallback.clone().ok_or_else(|| {
            OracleError::ResponseError(format!("Oracle '{}' has no scripted answer", self.id))
        })
    }

    fn oracle_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_queue_takes_priority_over_rules() {
        let oracle = ScriptedOracle::with_answers("s", ["first", "second"]).with_rule("x", "rule");

        assert_eq!(oracle.complete("x").await.unwrap(), "first");
        assert_eq!(oracle.complete("x").await.unwrap(), "second");
        assert_eq!(oracle.complete("x").await.unwrap(), "rule");
        assert_eq!(oracle.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let oracle = ScriptedOracle::new("s")
            .with_rule("Review", "review answer")
            .with_rule("Re", "other answer");

        assert_eq!(oracle.complete("Review these items").await.unwrap(), "review answer");
        assert_eq!(oracle.complete("Refine these items").await.unwrap(), "other answer");
    }

    #[tokio::test]
    async fn test_no_answer_is_an_error() {
        let oracle = ScriptedOracle::new("s");
        assert!(matches!(oracle.complete("anything").await, Err(OracleError::ResponseError(_))));

        let oracle = oracle.with_fallback("fallback");
        assert_eq!(oracle.complete("anything").await.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn test_queued_error() {
        let oracle = ScriptedOracle::new("s").with_fallback("ok");
        oracle.push_error(OracleError::RequestError("down".to_string())).await;

        assert!(matches!(oracle.complete("p").await, Err(OracleError::RequestError(_))));
        assert_eq!(oracle.complete("p").await.unwrap(), "ok");
        assert_eq!(oracle.prompts().await, vec!["p".to_string(), "p".to_string()]);
    }

    #[tokio::test]
    async fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
fallback = "nothing"

[[rules]]
contains = "Review"
answer = '{{"requires_changes": false}}'
"#
        )
        .unwrap();

        let oracle = ScriptedOracle::from_toml_file("file", file.path()).unwrap();
        assert_eq!(oracle.complete("Review").await.unwrap(), r#"{"requires_changes": false}"#);
        assert_eq!(oracle.complete("other").await.unwrap(), "nothing");
    }

    #[test]
    fn test_from_missing_file() {
        let result = ScriptedOracle::from_toml_file("file", Path::new("/nonexistent/script.toml"));
        assert!(matches!(result, Err(OracleError::Unsupported(_))));
    }
}
