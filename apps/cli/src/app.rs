//! Composition root: builds every shared handle once from configuration.

use anyhow::{Context, Result};
use conductor_abstraction::Oracle;
use conductor_core::{CircuitBreakerRegistry, Config, RegistryClient};
use conductor_models::OracleFactory;
use conductor_orchestrator::{AgentSource, DispatchOrchestrator, Pipeline, RefinementController};
use std::sync::Arc;
use tracing::debug;

/// Shared handles for one CLI invocation.
pub struct App {
    oracle: Arc<dyn Oracle>,
    registry: Arc<RegistryClient>,
    breakers: Arc<CircuitBreakerRegistry>,
    config: Config,
}

impl App {
    /// Builds the oracle, registry client and breaker registry.
    pub fn build(config: &Config) -> Result<Self> {
        let oracle = OracleFactory::create(&config.oracle).context("Failed to create oracle")?;
        let registry = Arc::new(RegistryClient::from_config(&config.client));
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.dispatch.breaker.breaker_config()));
        debug!(oracle_id = %oracle.oracle_id(), registry = %registry.endpoint(), "Application assembled");
        Ok(Self { oracle, registry, breakers, config: config.clone() })
    }

    pub fn refinement(&self) -> RefinementController {
        RefinementController::new(Arc::clone(&self.oracle), &self.config.refinement)
    }

    pub fn dispatcher(&self) -> DispatchOrchestrator {
        let source: Arc<dyn AgentSource> = self.registry.clone();
        DispatchOrchestrator::new(
            Arc::clone(&self.oracle),
            source,
            Arc::clone(&self.breakers),
            self.config.dispatch.clone(),
        )
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.refinement(), self.dispatcher())
    }
}
