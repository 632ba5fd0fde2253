//! Action-item refinement and resilient dispatch to worker agents.
//!
//! [`RefinementController`] turns meeting notes into a reviewed set of action
//! items. [`DispatchOrchestrator`] routes each item to a registered agent with
//! the help of an oracle and calls it through a circuit breaker and a retry
//! executor. [`Pipeline`] chains the two.

pub mod agent_client;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod refinement;
pub mod routing;
pub mod types;

pub use agent_client::{AgentClient, AgentReply};
pub use dispatch::{AgentSource, CANCELLED_RESPONSE, DispatchOrchestrator, UNASSIGNED_RESPONSE};
pub use error::{AgentCallError, OrchestrationError, RefinementError, Result};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use refinement::{RefinementController, RefinementOutcome, Termination};
pub use routing::{Router, resolve_agent};
pub use types::{
    ActionItem, ActionItemsList, DispatchSummary, ExecutionResult, Priority, ReviewFeedback, RoutingDecision,
    TBD, UNASSIGNED_AGENT,
};
