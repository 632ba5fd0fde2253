//! Conductor Core - agent registry and resilience primitives.
//!
//! This crate provides:
//! - A TTL-based agent registry with an HTTP service and client
//! - Agent heartbeat lifecycle
//! - Circuit breakers and retry with backoff
//! - Configuration, error context and logging setup
//!
//! # Example
//!
//! ```rust,no_run
//! use conductor_core::{AgentRegistry, MemoryStore, RegistryService, config::Config};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> conductor_core::error::Result<()> {
//!     let config = Config::load(None)?;
//!     let registry = AgentRegistry::new(Arc::new(MemoryStore::new()), config.registry.agent_ttl());
//!     let service = Arc::new(RegistryService::new(Arc::new(registry), config.registry.clone()));
//!     let listener = RegistryService::bind(config.server.address).await?;
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     service.serve(listener, shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod resilience;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use error::{CoreError, ErrorCode, ErrorContext, Result};
pub use logging::init_logging;
pub use registry::{
    AgentDescriptor, AgentRegistry, AgentStatus, HeartbeatHandle, HeartbeatStatus, Heartbeater,
    RegistryClient, RegistryService, RegistryStats,
};
pub use resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    ResilienceError, RetryExecutor, RetryPolicy,
};
pub use store::{KeyValueStore, MemoryStore, StoreError};
