//! Error types for dispatch and refinement.

use crate::types::ActionItemsList;
use conductor_abstraction::OracleError;
use conductor_core::{ErrorCode, ErrorContext};
use std::time::Duration;
use thiserror::Error;

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Failure of a single `POST /agent` call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentCallError {
    /// No answer within the call deadline.
    #[error("Agent {agent} timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Agent identity.
        agent: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// Connection refused, reset or otherwise undeliverable.
    #[error("Agent {agent} unreachable: {message}")]
    Transport {
        /// Agent identity.
        agent: String,
        /// Underlying transport message.
        message: String,
    },

    /// The agent answered with a non-2xx status.
    #[error("Agent {agent} answered with status {status}")]
    Status {
        /// Agent identity.
        agent: String,
        /// HTTP status code.
        status: u16,
        /// Start of the response body.
        body: String,
    },

    /// The agent answered 2xx with a body that is not a valid agent response.
    #[error("Invalid response from agent {agent}: {message}")]
    InvalidResponse {
        /// Agent identity.
        agent: String,
        /// Parse failure.
        message: String,
    },
}

impl AgentCallError {
    /// Transport failures and timeouts are worth another attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }

    /// Returns true when the agent itself produced the failure.
    pub const fn is_agent_reported(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::InvalidResponse { .. })
    }

    /// Builds a structured report for logs.
    #[must_use]
    pub fn report(&self) -> ErrorContext {
        let report = ErrorContext::from_error(self);
        match self {
            Self::Timeout { agent, timeout } => report
                .with_context("agent_name", agent)
                .with_context("timeout_secs", timeout.as_secs()),
            Self::Transport { agent, .. } | Self::InvalidResponse { agent, .. } => {
                report.with_context("agent_name", agent)
            }
            Self::Status { agent, status, body } => report
                .with_context("agent_name", agent)
                .with_context("status_code", status)
                .with_context("response", body),
        }
    }
}

impl ErrorCode for AgentCallError {
    fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "AgentTimeout",
            Self::Transport { .. } => "AgentUnavailable",
            Self::Status { status, .. } if *status >= 500 => "AgentUnavailable",
            Self::Status { .. } | Self::InvalidResponse { .. } => "AgentResponse",
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "AGENT_TIMEOUT",
            Self::Transport { .. } => "AGENT_UNREACHABLE",
            Self::Status { status, .. } if *status >= 500 => "AGENT_UNAVAILABLE",
            Self::Status { .. } => "AGENT_ERROR",
            Self::InvalidResponse { .. } => "INVALID_RESPONSE",
        }
    }
}

/// Why a refinement run stopped without an approved result.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RefinementError {
    /// Generation failed before any item set existed.
    #[error("Generation failed: {source}")]
    Generation {
        /// Oracle failure.
        source: OracleError,
    },

    /// Review failed; carries the last item set produced.
    #[error("Review failed at iteration {iteration}: {source}")]
    Review {
        /// Refinement iteration at which the review ran.
        iteration: u32,
        /// Oracle failure.
        source: OracleError,
        /// Last good item set.
        last_good: Box<ActionItemsList>,
    },

    /// Refinement failed; carries the last item set produced.
    #[error("Refinement failed at iteration {iteration}: {source}")]
    Refinement {
        /// Refinement iteration that failed.
        iteration: u32,
        /// Oracle failure.
        source: OracleError,
        /// Last good item set.
        last_good: Box<ActionItemsList>,
    },
}

impl RefinementError {
    /// Returns the last good item set, if one was produced before the failure.
    pub fn last_good(&self) -> Option<&ActionItemsList> {
        match self {
            Self::Generation { .. } => None,
            Self::Review { last_good, .. } | Self::Refinement { last_good, .. } => Some(last_good),
        }
    }
}

impl ErrorCode for RefinementError {
    fn error_kind(&self) -> &'static str {
        match self {
            Self::Generation { .. } => "GenerationFailed",
            Self::Review { .. } => "ReviewFailed",
            Self::Refinement { .. } => "RefinementFailed",
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Generation { .. } => "GENERATION_ERROR",
            Self::Review { .. } => "REVIEW_ERROR",
            Self::Refinement { .. } => "REFINEMENT_ERROR",
        }
    }
}

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The refinement loop aborted.
    #[error(transparent)]
    Refinement(#[from] RefinementError),

    /// No agent is registered.
    #[error("No agents available in the registry")]
    NoAgents,

    /// Invalid input document.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
