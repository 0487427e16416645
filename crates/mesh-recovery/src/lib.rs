//! Mesh Recovery - loop detection and recovery policy
//!
//! Classifies agent failures and decides how to recover:
//! - [`LoopDetector`]: error signatures, loop histories, circuit breakers
//!   and context enrichment
//! - [`RecoveryPolicyEngine`]: action selection, backoff, retry history and
//!   fan-out of retry contexts to alternative agents
//!
//! # Example
//! ```
//! use mesh_core::{AgentRegistry, Payload, RecoveryConfig};
//! use mesh_recovery::{RecoveryAction, RecoveryPolicyEngine};
//! use std::sync::Arc;
//!
//! let engine = RecoveryPolicyEngine::new(RecoveryConfig::default(), Arc::new(AgentRegistry::new()));
//! let err = std::io::Error::other("timeout");
//! let result = engine.handle_error("alpha", "x.process", &err, &Payload::new()).unwrap();
//! assert_eq!(result.action, RecoveryAction::Retry);
//! ```

#![warn(unreachable_pub)]

pub mod action;
pub mod backoff;
pub mod circuit_breaker;
pub mod detector;
pub mod enrichment;
pub mod policy;
pub mod propagation;
pub mod retry;
pub mod state;

pub use action::{decide_recovery_action, DecisionLimits, RecoveryAction};
pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreakerStatus, CircuitState, Transition};
pub use detector::{LoopContext, LoopDetection, LoopDetector};
pub use enrichment::{
    ContextEnrichment, ErrorContext, HealthStatus, RecoveryContext, SystemContext, SystemHealth,
};
pub use policy::{ErrorHandlingResult, HandlingMetadata, RecoveryPolicyEngine};
pub use propagation::{
    PropagationOutcome, PropagationResult, AGENT_NOT_REGISTERED, CANNOT_HANDLE_EVENT,
};
pub use retry::{retry_key, AgentRetryContext};
pub use state::{AgentStatus, SystemState};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
