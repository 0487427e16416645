//! Recovery actions and the decision order that selects them

use crate::circuit_breaker::CircuitState;
use crate::enrichment::{ContextEnrichment, HealthStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryAction {
    /// Re-invoke the same agent after a backoff delay
    Retry,
    /// Hand the work to an alternative agent
    Fallback,
    /// Continue with a reduced strategy
    Degrade,
    /// Stop retrying
    Fail,
    /// The agent's breaker is open; do not dispatch to it
    CircuitBreak,
}

impl RecoveryAction {
    /// Every action, in declaration order
    pub const ALL: [Self; 5] = [
        Self::Retry,
        Self::Fallback,
        Self::Degrade,
        Self::Fail,
        Self::CircuitBreak,
    ];

    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Fallback => "fallback",
            Self::Degrade => "degrade",
            Self::Fail => "fail",
            Self::CircuitBreak => "circuit-break",
        }
    }

    /// Everything except `fail` counts as handled
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        !matches!(self, Self::Fail)
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits the decision order consults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionLimits {
    /// Retries allowed before `fail`
    pub max_retries: u32,
    /// Loop iterations after which a loop is failed outright
    pub loop_iteration_cap: u32,
}

/// Pick the recovery action for an enriched failure
///
/// The first matching rule wins:
/// 1. open breaker -> `circuit-break`
/// 2. loop past the iteration cap -> `fail`
/// 3. critical system health -> `degrade`
/// 4. alternative agents available -> `fallback`
/// 5. fallback strategies available -> `degrade`
/// 6. attempts within `max_retries` -> `retry`
/// 7. otherwise -> `fail`
#[must_use]
pub fn decide_recovery_action(
    enrichment: &ContextEnrichment,
    is_loop: bool,
    limits: DecisionLimits,
) -> RecoveryAction {
    let iteration = enrichment.error_context.iteration_count;
    let recovery = &enrichment.recovery_context;

    if recovery.circuit_breaker_status.state == CircuitState::Open {
        RecoveryAction::CircuitBreak
    } else if is_loop && iteration > limits.loop_iteration_cap {
        RecoveryAction::Fail
    } else if enrichment.system_context.system_health.overall_status == HealthStatus::Critical {
        RecoveryAction::Degrade
    } else if !recovery.alternative_agents.is_empty() {
        RecoveryAction::Fallback
    } else if !recovery.fallback_strategies.is_empty() {
        RecoveryAction::Degrade
    } else if iteration <= limits.max_retries {
        RecoveryAction::Retry
    } else {
        RecoveryAction::Fail
    }
}
