//! Context attached to every detected failure

use crate::circuit_breaker::CircuitBreakerStatus;
use mesh_core::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Overall mesh health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Few or no failing agents
    Nominal,
    /// Several failing agents
    Degraded,
    /// Many failing agents
    Critical,
}

impl HealthStatus {
    /// Classify a count of concurrently failing agents
    ///
    /// Monotone in `failing_agents`.
    #[must_use]
    pub fn from_failing_agents(failing_agents: usize, degraded_at: usize, critical_at: usize) -> Self {
        if failing_agents >= critical_at {
            Self::Critical
        } else if failing_agents >= degraded_at {
            Self::Degraded
        } else {
            Self::Nominal
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Nominal => "nominal",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        })
    }
}

/// Health snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    /// Classification
    pub overall_status: HealthStatus,
    /// Agents with outstanding failures when the snapshot was taken
    pub failing_agents: usize,
}

/// Where the failing signature stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// Occurrences of this signature so far, including this one
    pub iteration_count: u32,
    /// Time since the signature was first seen, in milliseconds
    pub time_elapsed_ms: u64,
}

impl ErrorContext {
    /// Time since the signature was first seen
    #[inline]
    #[must_use]
    pub fn time_elapsed(&self) -> Duration {
        Duration::from_millis(self.time_elapsed_ms)
    }
}

/// System-wide context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemContext {
    /// Health at detection time
    pub system_health: SystemHealth,
}

/// Recovery options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryContext {
    /// Breaker status of the failing agent, before this failure is counted
    pub circuit_breaker_status: CircuitBreakerStatus,
    /// Other agents able to take the event's namespace
    pub alternative_agents: Vec<String>,
    /// Static strategies for the event's namespace
    pub fallback_strategies: Vec<String>,
}

/// Everything known about a failure at detection time
///
/// Produced once per failure and copied, never shared, across component
/// boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEnrichment {
    /// Loop position
    pub error_context: ErrorContext,
    /// Mesh health
    pub system_context: SystemContext,
    /// Recovery options
    pub recovery_context: RecoveryContext,
    /// Caller context passed through to a retried call
    pub enriched_data: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_thresholds() {
        assert_eq!(HealthStatus::from_failing_agents(0, 3, 8), HealthStatus::Nominal);
        assert_eq!(HealthStatus::from_failing_agents(2, 3, 8), HealthStatus::Nominal);
        assert_eq!(HealthStatus::from_failing_agents(3, 3, 8), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_failing_agents(7, 3, 8), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_failing_agents(8, 3, 8), HealthStatus::Critical);
    }

    #[test]
    fn health_is_monotone() {
        let mut previous = HealthStatus::Nominal;
        for failing in 0..20 {
            let status = HealthStatus::from_failing_agents(failing, 3, 8);
            assert!(status >= previous);
            previous = status;
        }
    }
}
