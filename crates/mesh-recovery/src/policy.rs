//! Recovery policy engine
//!
//! Entry point for agent failures. For each failure it:
//! 1. Asks the [`LoopDetector`] to classify and enrich it
//! 2. Picks one [`RecoveryAction`] using the fixed decision order
//! 3. Computes a backoff delay for `retry`
//! 4. Stores an [`AgentRetryContext`] in the retry history
//! 5. Counts the failure against the agent's circuit breaker
//!
//! The engine never blocks on the delay it computes; the caller decides
//! when to re-invoke.

use crate::action::{decide_recovery_action, DecisionLimits, RecoveryAction};
use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::CircuitState;
use crate::detector::{validate_key, LoopDetection, LoopDetector};
use crate::enrichment::{ContextEnrichment, HealthStatus};
use crate::retry::AgentRetryContext;
use crate::state::{AgentStatus, SystemState};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mesh_core::{
    clock::elapsed_between, events, AgentRegistry, Clock, MeshError, Payload, RecoveryConfig,
    SystemClock, TraceRecord, TraceSink, TracingSink,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Diagnostics returned with every decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlingMetadata {
    /// Whether the signature had repeated
    pub is_loop: bool,
    /// Loop iteration of this failure
    pub iteration_count: u32,
    /// Milliseconds since the signature was first seen
    pub time_elapsed_ms: u64,
    /// Breaker state after this failure was counted
    pub circuit_state: CircuitState,
    /// Mesh health at detection time
    pub system_health: HealthStatus,
    /// Key of the stored retry context
    pub retry_context_key: String,
    /// When the decision was made
    pub decided_at: DateTime<Utc>,
}

/// Outcome of [`RecoveryPolicyEngine::handle_error`]
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorHandlingResult {
    /// `false` only for `fail`
    pub success: bool,
    /// Chosen action
    pub action: RecoveryAction,
    /// Enrichment the decision was based on
    pub enriched_context: ContextEnrichment,
    /// Backoff before re-invoking; only for `retry`
    pub retry_delay: Option<Duration>,
    /// First alternative agent; only for `fallback`
    pub alternative_agent: Option<String>,
    /// First fallback strategy; only for `degrade` with strategies available
    pub fallback_strategy: Option<String>,
    /// Retry context stored for this failure
    pub retry_context: AgentRetryContext,
    /// Diagnostics
    pub metadata: HandlingMetadata,
}

/// Turns enriched failures into recovery actions
pub struct RecoveryPolicyEngine {
    config: RecoveryConfig,
    backoff: BackoffPolicy,
    pub(crate) detector: LoopDetector,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) sink: Arc<dyn TraceSink>,
    retry_history: DashMap<String, AgentRetryContext>,
}

impl RecoveryPolicyEngine {
    /// Engine on the system clock, tracing to `tracing`
    #[must_use]
    pub fn new(config: RecoveryConfig, registry: Arc<AgentRegistry>) -> Self {
        Self::with_parts(config, registry, Arc::new(SystemClock), Arc::new(TracingSink))
    }

    /// Engine with an explicit clock and trace sink
    ///
    /// The same clock and sink are handed to the owned [`LoopDetector`].
    #[must_use]
    pub fn with_parts(
        config: RecoveryConfig,
        registry: Arc<AgentRegistry>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        let detector = LoopDetector::new(
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&clock),
            Arc::clone(&sink),
        );
        Self {
            backoff: BackoffPolicy::from_config(&config),
            config,
            detector,
            registry,
            clock,
            sink,
            retry_history: DashMap::new(),
        }
    }

    /// Decide how to recover from one failure
    ///
    /// The original error is absorbed: whatever happened, the caller gets a
    /// decision. `success` is `false` only when the action is `fail`.
    ///
    /// Detection, decision and the breaker update run under the agent's
    /// lock, so concurrent failures of one agent are counted and decided
    /// one after another.
    ///
    /// # Errors
    /// Returns [`MeshError::Detector`] if `agent_id` or `event_type` is blank
    pub fn handle_error(
        &self,
        agent_id: &str,
        event_type: &str,
        error: &dyn std::error::Error,
        context: &Payload,
    ) -> Result<ErrorHandlingResult, MeshError> {
        validate_key(agent_id, event_type)?;
        let lock = self.detector.agent_lock(agent_id);
        let _serialized = lock.lock();

        let LoopDetection {
            is_loop,
            loop_context,
            enriched_context,
            ..
        } = self.detector.detect_and_handle_loop(agent_id, event_type, error, context)?;

        let action = decide_recovery_action(&enriched_context, is_loop, self.limits());
        let iteration = enriched_context.error_context.iteration_count;
        let recovery = &enriched_context.recovery_context;

        let retry_delay = (action == RecoveryAction::Retry).then(|| self.backoff.delay(iteration));
        let alternative_agent = match action {
            RecoveryAction::Fallback => recovery.alternative_agents.first().cloned(),
            _ => None,
        };
        let fallback_strategy = match action {
            RecoveryAction::Degrade => recovery.fallback_strategies.first().cloned(),
            _ => None,
        };

        let now = self.clock.now();
        let retry_context = AgentRetryContext {
            agent_id: agent_id.to_string(),
            event_type: event_type.to_string(),
            original_error: error.to_string(),
            enriched_context: enriched_context.clone(),
            retry_attempt: iteration,
            max_retries: self.config.max_retries,
            alternative_agents: recovery.alternative_agents.clone(),
            fallback_strategies: recovery.fallback_strategies.clone(),
            created_at: now,
        };
        let retry_context_key = retry_context.key();
        self.retry_history
            .insert(retry_context_key.clone(), retry_context.clone());

        let breaker = self.detector.update_circuit_breaker(agent_id, false);

        let success = action.is_success();
        let metadata = HandlingMetadata {
            is_loop,
            iteration_count: iteration,
            time_elapsed_ms: loop_context.elapsed_ms(),
            circuit_state: breaker.state,
            system_health: enriched_context.system_context.system_health.overall_status,
            retry_context_key,
            decided_at: now,
        };

        tracing::info!(
            agent_id,
            event_type,
            action = %action,
            iteration,
            circuit = %breaker.state,
            delay_ms = retry_delay.map(millis),
            "recovery decided"
        );
        metrics::counter!("mesh_recovery_actions_total", "action" => action.as_str()).increment(1);
        self.sink.record(TraceRecord::new(
            now,
            events::RECOVERY_DECIDED,
            agent_id,
            serde_json::json!({
                "eventType": event_type,
                "action": action,
                "success": success,
                "retryDelayMs": retry_delay.map(millis),
                "alternativeAgent": alternative_agent,
                "fallbackStrategy": fallback_strategy,
                "metadata": metadata,
            }),
        ));

        Ok(ErrorHandlingResult {
            success,
            action,
            enriched_context,
            retry_delay,
            alternative_agent,
            fallback_strategy,
            retry_context,
            metadata,
        })
    }

    /// Report that an agent handled an event successfully
    ///
    /// Closes the agent's breaker and forgets its loop histories, since a
    /// loop is a repetition without an intervening success.
    pub fn report_success(&self, agent_id: &str) {
        let lock = self.detector.agent_lock(agent_id);
        let _serialized = lock.lock();
        self.detector.update_circuit_breaker(agent_id, true);
        let cleared = self.detector.clear_loops_for(agent_id);
        tracing::debug!(agent_id, cleared, "success reported");
    }

    /// Remove retry contexts older than the retention window
    ///
    /// Returns how many entries were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.retry_history_ttl();
        let before = self.retry_history.len();
        self.retry_history
            .retain(|_, ctx| elapsed_between(ctx.created_at, now) <= ttl);
        let removed = before.saturating_sub(self.retry_history.len());

        if removed > 0 {
            tracing::debug!(removed, "retry history cleaned");
            self.sink.record(TraceRecord::new(
                now,
                events::RETRY_HISTORY_CLEANED,
                "recovery-engine",
                serde_json::json!({
                    "removed": removed,
                    "remaining": self.retry_history.len(),
                }),
            ));
        }
        removed
    }

    /// Copy of one stored retry context
    #[must_use]
    pub fn retry_context(&self, key: &str) -> Option<AgentRetryContext> {
        self.retry_history.get(key).map(|entry| entry.value().clone())
    }

    /// Copy of the retry history, oldest first
    #[must_use]
    pub fn retry_history(&self) -> Vec<AgentRetryContext> {
        let mut history: Vec<AgentRetryContext> = self
            .retry_history
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key().cmp(&b.key())));
        history
    }

    /// Read-only copy of the engine's and detector's state
    #[must_use]
    pub fn system_state(&self) -> SystemState {
        let active_loops = self.detector.active_loops();
        let circuit_breakers = self.detector.circuit_breakers();

        let mut agent_statuses: BTreeMap<String, AgentStatus> = BTreeMap::new();
        for id in self.registry.ids() {
            let capabilities = self.registry.capabilities(&id).unwrap_or_default();
            agent_statuses.insert(id.clone(), AgentStatus::registered(capabilities));
        }
        for (id, breaker) in &circuit_breakers {
            let status = agent_statuses
                .entry(id.clone())
                .or_insert_with(AgentStatus::unregistered);
            status.circuit_state = breaker.state;
            status.failure_count = breaker.failure_count;
        }
        for loop_context in &active_loops {
            if let Some(status) = agent_statuses.get_mut(&loop_context.agent_id) {
                status.active_loops += 1;
            }
        }

        SystemState {
            active_loops,
            agent_statuses,
            circuit_breakers,
            system_health: self.detector.system_health(),
            retry_history: self.retry_history(),
        }
    }

    /// The owned loop detector
    #[inline]
    #[must_use]
    pub fn detector(&self) -> &LoopDetector {
        &self.detector
    }

    /// The agent registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    fn limits(&self) -> DecisionLimits {
        DecisionLimits {
            max_retries: self.config.max_retries,
            loop_iteration_cap: self.config.loop_iteration_cap,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for RecoveryPolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryPolicyEngine")
            .field("config", &self.config)
            .field("detector", &self.detector)
            .field("retry_history", &self.retry_history.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::{BufferedSink, ManualClock};

    fn engine(config: RecoveryConfig) -> (RecoveryPolicyEngine, Arc<ManualClock>, Arc<BufferedSink>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let sink = Arc::new(BufferedSink::new());
        let engine = RecoveryPolicyEngine::with_parts(
            config,
            Arc::new(AgentRegistry::new()),
            clock.clone(),
            sink.clone(),
        );
        (engine, clock, sink)
    }

    fn failure() -> std::io::Error {
        std::io::Error::other("handler crashed")
    }

    #[test]
    fn retry_result_carries_delay() {
        let (engine, _, sink) = engine(RecoveryConfig::default());
        let result = engine
            .handle_error("alpha", "x.process", &failure(), &Payload::new())
            .unwrap();

        assert!(result.success);
        assert_eq!(result.action, RecoveryAction::Retry);
        let delay = result.retry_delay.unwrap();
        assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_millis(1_100));
        assert!(result.alternative_agent.is_none());
        assert_eq!(result.metadata.iteration_count, 1);
        assert_eq!(sink.count(events::RECOVERY_DECIDED), 1);
    }

    #[test]
    fn every_failure_counts_against_breaker() {
        let (engine, _, _) = engine(RecoveryConfig::default());
        for _ in 0..3 {
            engine
                .handle_error("alpha", "x.process", &failure(), &Payload::new())
                .unwrap();
        }
        assert_eq!(engine.detector().circuit_breaker("alpha").unwrap().failure_count, 3);
    }

    #[test]
    fn degrade_picks_first_strategy() {
        let (engine, _, _) = engine(RecoveryConfig::default());
        let result = engine
            .handle_error("alpha", "deployment.rollout", &failure(), &Payload::new())
            .unwrap();
        assert_eq!(result.action, RecoveryAction::Degrade);
        assert_eq!(result.fallback_strategy.as_deref(), Some("rollback"));
        assert!(result.retry_delay.is_none());
    }

    #[test]
    fn retry_history_is_stored_and_cleaned() {
        let (engine, clock, sink) = engine(RecoveryConfig::default());
        let result = engine
            .handle_error("alpha", "x.process", &failure(), &Payload::new())
            .unwrap();
        let key = result.metadata.retry_context_key.clone();
        assert_eq!(key, "alpha-x.process-0");
        assert_eq!(engine.retry_context(&key).unwrap().original_error, "handler crashed");

        clock.advance(Duration::from_secs(300));
        assert_eq!(engine.cleanup(), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(engine.cleanup(), 1);
        assert!(engine.retry_context(&key).is_none());
        assert_eq!(sink.count(events::RETRY_HISTORY_CLEANED), 1);
    }

    #[test]
    fn success_resets_breaker_and_loops() {
        let (engine, _, _) = engine(RecoveryConfig::default());
        for _ in 0..2 {
            engine
                .handle_error("alpha", "x.process", &failure(), &Payload::new())
                .unwrap();
        }
        engine.report_success("alpha");

        let state = engine.system_state();
        assert!(state.active_loops.is_empty());
        assert_eq!(state.circuit_breakers["alpha"].failure_count, 0);

        let next = engine
            .handle_error("alpha", "x.process", &failure(), &Payload::new())
            .unwrap();
        assert_eq!(next.metadata.iteration_count, 1);
    }

    #[test]
    fn malformed_key_is_an_error() {
        let (engine, _, _) = engine(RecoveryConfig::default());
        let err = engine
            .handle_error("", "x.process", &failure(), &Payload::new())
            .unwrap_err();
        assert!(err.is_programmer_error());
        assert!(engine.retry_history().is_empty());
    }
}
