//! Oracle implementations for Conductor.
//!
//! This crate provides concrete implementations of the `Oracle` trait.
//!
//! # Supported Oracles
//!
//! - **Mock**: echoes prompts, for smoke tests and demos
//! - **Scripted**: canned answers selected by prompt content, for tests and offline runs
//! - **Universal**: any OpenAI-compatible chat completions server

pub mod factory;
pub mod scripted;
pub mod universal;

use async_trait::async_trait;
use conductor_abstraction::{Oracle, OracleError};
use tracing::debug;

pub use factory::{OracleConfig, OracleFactory, OracleKind};
pub use scripted::{ScriptRule, ScriptedOracle};
pub use universal::UniversalOracle;

/// A mock implementation of the `Oracle` trait that echoes its prompt.
#[derive(Debug, Default)]
pub struct MockOracle {
    id: String,
}

impl MockOracle {
    /// Creates a new `MockOracle` with the given ID.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        debug!(oracle_id = %self.id, prompt_len = prompt.len(), "MockOracle completing prompt");
        Ok(format!("Mock response for: {prompt}\nOracle ID: {}", self.id))
    }

    fn oracle_id(&self) -> &str {
        &self.id
    }
}
