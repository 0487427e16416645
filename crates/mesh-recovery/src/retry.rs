//! Retry contexts handed to alternative agents

use crate::enrichment::ContextEnrichment;
use chrono::{DateTime, Utc};
use mesh_core::Payload;
use serde::{Deserialize, Serialize};

/// Everything an alternative agent needs to redo failed work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRetryContext {
    /// Agent whose handler failed
    pub agent_id: String,
    /// Event that failed
    pub event_type: String,
    /// Message of the original error
    pub original_error: String,
    /// Enrichment produced for the failure
    pub enriched_context: ContextEnrichment,
    /// Attempt number (the loop iteration)
    pub retry_attempt: u32,
    /// Retry budget
    pub max_retries: u32,
    /// Candidate agents for the retry
    pub alternative_agents: Vec<String>,
    /// Candidate fallback strategies
    pub fallback_strategies: Vec<String>,
    /// When the context was created
    pub created_at: DateTime<Utc>,
}

impl AgentRetryContext {
    /// Retry-history key: `{agent_id}-{event_type}-{created_at_ms}`
    #[must_use]
    pub fn key(&self) -> String {
        retry_key(&self.agent_id, &self.event_type, self.created_at)
    }

    /// Payload for one target agent
    ///
    /// The original enriched data plus a `retryInfo` object naming the
    /// original agent, the attempt, the target and the first fallback
    /// strategy.
    #[must_use]
    pub fn payload_for(&self, target_agent: &str) -> Payload {
        let mut payload = self.enriched_context.enriched_data.clone();
        payload.insert(
            "retryInfo".to_string(),
            serde_json::json!({
                "originalAgent": self.agent_id,
                "retryAttempt": self.retry_attempt,
                "alternativeAgent": target_agent,
                "fallbackStrategy": self.fallback_strategies.first(),
            }),
        );
        payload
    }
}

/// Build a retry-history key
#[must_use]
pub fn retry_key(agent_id: &str, event_type: &str, created_at: DateTime<Utc>) -> String {
    format!("{agent_id}-{event_type}-{}", created_at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerStatus;
    use crate::enrichment::{
        ErrorContext, HealthStatus, RecoveryContext, SystemContext, SystemHealth,
    };

    fn context() -> AgentRetryContext {
        let mut data = Payload::new();
        data.insert("batch".into(), 7.into());
        AgentRetryContext {
            agent_id: "alpha".into(),
            event_type: "gpu.compute".into(),
            original_error: "oom".into(),
            enriched_context: ContextEnrichment {
                error_context: ErrorContext {
                    iteration_count: 2,
                    time_elapsed_ms: 10,
                },
                system_context: SystemContext {
                    system_health: SystemHealth {
                        overall_status: HealthStatus::Nominal,
                        failing_agents: 1,
                    },
                },
                recovery_context: RecoveryContext {
                    circuit_breaker_status: CircuitBreakerStatus::default(),
                    alternative_agents: vec!["beta".into()],
                    fallback_strategies: vec!["cpu-execution".into()],
                },
                enriched_data: data,
            },
            retry_attempt: 2,
            max_retries: 3,
            alternative_agents: vec!["beta".into()],
            fallback_strategies: vec!["cpu-execution".into()],
            created_at: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::milliseconds(1_500),
        }
    }

    #[test]
    fn key_format() {
        assert_eq!(context().key(), "alpha-gpu.compute-1500");
    }

    #[test]
    fn payload_carries_retry_info() {
        let payload = context().payload_for("beta");
        assert_eq!(payload["batch"], 7);
        let info = &payload["retryInfo"];
        assert_eq!(info["originalAgent"], "alpha");
        assert_eq!(info["retryAttempt"], 2);
        assert_eq!(info["alternativeAgent"], "beta");
        assert_eq!(info["fallbackStrategy"], "cpu-execution");
    }
}
