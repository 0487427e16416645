//! Diagnostic snapshot of the recovery core

use crate::circuit_breaker::{CircuitBreakerStatus, CircuitState};
use crate::detector::LoopContext;
use crate::enrichment::SystemHealth;
use crate::retry::AgentRetryContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-agent view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Present in the agent registry
    pub registered: bool,
    /// Declared capability tags
    pub capabilities: Vec<String>,
    /// Breaker state as observed now
    pub circuit_state: CircuitState,
    /// Failures since the last success
    pub failure_count: u32,
    /// Signatures of this agent that have repeated
    pub active_loops: usize,
}

impl AgentStatus {
    pub(crate) fn registered(capabilities: Vec<String>) -> Self {
        Self {
            registered: true,
            capabilities,
            circuit_state: CircuitState::Closed,
            failure_count: 0,
            active_loops: 0,
        }
    }

    pub(crate) fn unregistered() -> Self {
        Self {
            registered: false,
            ..Self::registered(Vec::new())
        }
    }
}

/// Copy of the core's state for operators and tests
///
/// Owns its data; mutating it has no effect on the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    /// Repeated signatures
    pub active_loops: Vec<LoopContext>,
    /// Every registered agent and every agent with a breaker
    pub agent_statuses: BTreeMap<String, AgentStatus>,
    /// Breakers as observed now
    pub circuit_breakers: BTreeMap<String, CircuitBreakerStatus>,
    /// Mesh health now
    pub system_health: SystemHealth,
    /// Retry contexts, oldest first
    pub retry_history: Vec<AgentRetryContext>,
}
