//! Loop detection and failure enrichment
//!
//! The [`LoopDetector`] is the single owner of two tables:
//! - loop histories, keyed by [`ErrorSignature`]
//! - circuit breakers, keyed by agent id
//!
//! Both live in `DashMap`s and every mutation goes through one `entry`
//! guard, so a single update is atomic for its key. Classifying a failure
//! and counting it against the breaker are two updates; callers that need
//! them ordered per agent hold [`LoopDetector::agent_lock`] across both, as
//! the recovery engine does.

use crate::action::{decide_recovery_action, DecisionLimits, RecoveryAction};
use crate::circuit_breaker::{CircuitBreakerStatus, CircuitState, Transition};
use crate::enrichment::{
    ContextEnrichment, ErrorContext, HealthStatus, RecoveryContext, SystemContext, SystemHealth,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mesh_core::{
    clock::elapsed_between, event_namespace, events, AgentRegistry, Clock, DetectorError,
    ErrorSignature, Payload, RecoveryConfig, TraceRecord, TraceSink,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// History of one failure signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopContext {
    /// Failing agent
    pub agent_id: String,
    /// Event being handled
    pub event_type: String,
    /// Occurrences so far; never decreases
    pub iteration: u32,
    /// Normalized error message
    pub error_pattern: String,
    /// First occurrence
    pub first_seen_at: DateTime<Utc>,
    /// Latest occurrence
    pub last_seen_at: DateTime<Utc>,
}

impl LoopContext {
    fn new(signature: &ErrorSignature, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: signature.agent_id.clone(),
            event_type: signature.event_type.clone(),
            iteration: 0,
            error_pattern: signature.error_pattern.clone(),
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    fn record(&mut self, now: DateTime<Utc>) {
        self.iteration = self.iteration.saturating_add(1);
        self.last_seen_at = now;
    }

    /// Whether the signature has repeated
    #[inline]
    #[must_use]
    pub fn is_loop(&self) -> bool {
        self.iteration > 1
    }

    /// Milliseconds between first and latest occurrence
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        let elapsed = elapsed_between(self.first_seen_at, self.last_seen_at);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Result of classifying one failure
#[derive(Debug, Clone, PartialEq)]
pub struct LoopDetection {
    /// Whether the signature had been seen before
    pub is_loop: bool,
    /// Copy of the signature history after this failure
    pub loop_context: LoopContext,
    /// Context for the policy engine
    pub enriched_context: ContextEnrichment,
    /// Action the decision order suggests for this enrichment
    pub recovery_action: RecoveryAction,
}

/// Recognizes repeated failures and owns circuit breaker state
pub struct LoopDetector {
    config: RecoveryConfig,
    registry: Arc<AgentRegistry>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TraceSink>,
    loops: DashMap<ErrorSignature, LoopContext>,
    breakers: DashMap<String, CircuitBreakerStatus>,
    agent_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LoopDetector {
    /// Create a detector
    #[must_use]
    pub fn new(
        config: RecoveryConfig,
        registry: Arc<AgentRegistry>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            config,
            registry,
            clock,
            sink,
            loops: DashMap::new(),
            breakers: DashMap::new(),
            agent_locks: DashMap::new(),
        }
    }

    /// Classify a failure and enrich it with system context
    ///
    /// Increments the signature's iteration, applies any due breaker
    /// cooldown, and emits `loop.detected` when the signature repeats. The
    /// failure itself is not counted against the breaker here; that happens
    /// in [`update_circuit_breaker`](Self::update_circuit_breaker).
    ///
    /// # Errors
    /// Returns [`DetectorError::MalformedKey`] if `agent_id` or `event_type`
    /// is blank
    pub fn detect_and_handle_loop(
        &self,
        agent_id: &str,
        event_type: &str,
        error: &dyn std::error::Error,
        context: &Payload,
    ) -> Result<LoopDetection, DetectorError> {
        validate_key(agent_id, event_type)?;

        let now = self.clock.now();
        let signature = ErrorSignature::new(agent_id, event_type, &error.to_string());

        let loop_context = {
            let mut entry = self
                .loops
                .entry(signature.clone())
                .or_insert_with(|| LoopContext::new(&signature, now));
            entry.record(now);
            entry.clone()
        };
        let is_loop = loop_context.is_loop();

        if is_loop {
            tracing::warn!(
                agent_id,
                event_type,
                iteration = loop_context.iteration,
                pattern = %loop_context.error_pattern,
                "failure loop detected"
            );
            metrics::counter!("mesh_loops_detected_total").increment(1);
            self.sink.record(TraceRecord::new(
                now,
                events::LOOP_DETECTED,
                agent_id,
                serde_json::json!({
                    "eventType": event_type,
                    "iteration": loop_context.iteration,
                    "errorPattern": loop_context.error_pattern,
                    "elapsedMs": loop_context.elapsed_ms(),
                }),
            ));
        } else {
            tracing::debug!(agent_id, event_type, "first occurrence of failure signature");
        }

        let circuit_breaker_status = self.observe_breaker(agent_id, now);
        let enriched_context = ContextEnrichment {
            error_context: ErrorContext {
                iteration_count: loop_context.iteration,
                time_elapsed_ms: loop_context.elapsed_ms(),
            },
            system_context: SystemContext {
                system_health: self.system_health(),
            },
            recovery_context: RecoveryContext {
                circuit_breaker_status,
                alternative_agents: self.alternative_agents(agent_id, event_type, now),
                fallback_strategies: self.fallback_strategies(event_type),
            },
            enriched_data: context.clone(),
        };
        let recovery_action = decide_recovery_action(&enriched_context, is_loop, self.limits());

        Ok(LoopDetection {
            is_loop,
            loop_context,
            enriched_context,
            recovery_action,
        })
    }

    /// Record a success or failure against an agent's breaker
    ///
    /// Returns the status after the update.
    pub fn update_circuit_breaker(&self, agent_id: &str, success: bool) -> CircuitBreakerStatus {
        let now = self.clock.now();
        let (status, transitions) = {
            let mut entry = self.breakers.entry(agent_id.to_string()).or_default();
            let mut transitions: Vec<Transition> = Vec::with_capacity(2);
            transitions.extend(entry.observe(now, self.config.recovery_timeout()));
            if success {
                transitions.extend(entry.record_success());
            } else {
                transitions.extend(entry.record_failure(now, self.config.circuit_breaker_threshold));
            }
            (entry.clone(), transitions)
        };

        for transition in transitions {
            self.emit_transition(agent_id, transition, &status, now);
        }
        status
    }

    /// Lock serializing multi-step updates for one agent
    #[must_use]
    pub fn agent_lock(&self, agent_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.agent_locks
                .entry(agent_id.to_string())
                .or_default()
                .value(),
        )
    }

    /// Breaker status of one agent as observed now
    #[must_use]
    pub fn circuit_breaker(&self, agent_id: &str) -> Option<CircuitBreakerStatus> {
        let now = self.clock.now();
        self.breakers
            .get(agent_id)
            .map(|entry| self.effective(entry.value(), now))
    }

    /// Copy of every breaker, as observed now
    #[must_use]
    pub fn circuit_breakers(&self) -> BTreeMap<String, CircuitBreakerStatus> {
        let now = self.clock.now();
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), self.effective(entry.value(), now)))
            .collect()
    }

    /// Signatures that have repeated, ordered by agent then event
    #[must_use]
    pub fn active_loops(&self) -> Vec<LoopContext> {
        let mut loops: Vec<LoopContext> = self
            .loops
            .iter()
            .filter(|entry| entry.is_loop())
            .map(|entry| entry.value().clone())
            .collect();
        loops.sort_by(|a, b| {
            (&a.agent_id, &a.event_type, &a.error_pattern)
                .cmp(&(&b.agent_id, &b.event_type, &b.error_pattern))
        });
        loops
    }

    /// History for one signature
    #[must_use]
    pub fn loop_context(&self, signature: &ErrorSignature) -> Option<LoopContext> {
        self.loops.get(signature).map(|entry| entry.value().clone())
    }

    /// Forget every loop history of an agent
    ///
    /// Returns how many signatures were removed.
    pub fn clear_loops_for(&self, agent_id: &str) -> usize {
        let mut removed = 0;
        self.loops.retain(|signature, _| {
            let keep = signature.agent_id != agent_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Current mesh health
    #[must_use]
    pub fn system_health(&self) -> SystemHealth {
        let failing_agents = self.breakers.iter().filter(|e| e.is_failing()).count();
        SystemHealth {
            overall_status: HealthStatus::from_failing_agents(
                failing_agents,
                self.config.health_degraded_at,
                self.config.health_critical_at,
            ),
            failing_agents,
        }
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

    fn effective(&self, status: &CircuitBreakerStatus, now: DateTime<Utc>) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            state: status.effective_state(now, self.config.recovery_timeout()),
            ..status.clone()
        }
    }

    fn observe_breaker(&self, agent_id: &str, now: DateTime<Utc>) -> CircuitBreakerStatus {
        let observed = self.breakers.get_mut(agent_id).map(|mut entry| {
            let transition = entry.observe(now, self.config.recovery_timeout());
            (entry.clone(), transition)
        });
        match observed {
            Some((status, transition)) => {
                if let Some(transition) = transition {
                    self.emit_transition(agent_id, transition, &status, now);
                }
                status
            }
            None => CircuitBreakerStatus::default(),
        }
    }

    fn alternative_agents(&self, agent_id: &str, event_type: &str, now: DateTime<Utc>) -> Vec<String> {
        self.registry
            .alternatives_for(agent_id, event_type)
            .into_iter()
            .filter(|candidate| {
                self.breakers.get(candidate).map_or(true, |status| {
                    status.effective_state(now, self.config.recovery_timeout()) != CircuitState::Open
                })
            })
            .collect()
    }

    fn fallback_strategies(&self, event_type: &str) -> Vec<String> {
        self.config
            .fallback_strategies
            .get(event_namespace(event_type))
            .cloned()
            .unwrap_or_default()
    }

    fn emit_transition(
        &self,
        agent_id: &str,
        transition: Transition,
        status: &CircuitBreakerStatus,
        now: DateTime<Utc>,
    ) {
        if transition.to == CircuitState::Open {
            tracing::warn!(agent_id, from = %transition.from, failures = status.failure_count, "circuit breaker opened");
        } else {
            tracing::info!(agent_id, from = %transition.from, to = %transition.to, "circuit breaker transition");
        }
        metrics::counter!("mesh_circuit_breaker_transitions_total", "to" => transition.to.as_str())
            .increment(1);
        self.sink.record(TraceRecord::new(
            now,
            transition.event_name(),
            agent_id,
            serde_json::json!({
                "from": transition.from,
                "to": transition.to,
                "failureCount": status.failure_count,
            }),
        ));
    }
}

impl std::fmt::Debug for LoopDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopDetector")
            .field("loops", &self.loops.len())
            .field("breakers", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

pub(crate) fn validate_key(agent_id: &str, event_type: &str) -> Result<(), DetectorError> {
    if agent_id.trim().is_empty() {
        return Err(DetectorError::MalformedKey { field: "agent_id" });
    }
    if event_type.trim().is_empty() {
        return Err(DetectorError::MalformedKey { field: "event_type" });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::{BufferedSink, ManualClock};
    use std::time::Duration;

    #[derive(Debug)]
    struct Boom(&'static str);

    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for Boom {}

    fn detector(config: RecoveryConfig) -> (LoopDetector, Arc<ManualClock>, Arc<BufferedSink>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let sink = Arc::new(BufferedSink::new());
        let detector = LoopDetector::new(
            config,
            Arc::new(AgentRegistry::new()),
            clock.clone(),
            sink.clone(),
        );
        (detector, clock, sink)
    }

    #[test]
    fn iteration_counts_per_signature() {
        let (detector, clock, sink) = detector(RecoveryConfig::default());
        let ctx = Payload::new();

        let first = detector
            .detect_and_handle_loop("alpha", "x.process", &Boom("timeout after 10ms"), &ctx)
            .unwrap();
        assert!(!first.is_loop);
        assert_eq!(first.loop_context.iteration, 1);

        clock.advance(Duration::from_millis(250));
        let second = detector
            .detect_and_handle_loop("alpha", "x.process", &Boom("timeout after 99ms"), &ctx)
            .unwrap();
        assert!(second.is_loop);
        assert_eq!(second.enriched_context.error_context.iteration_count, 2);
        assert_eq!(second.enriched_context.error_context.time_elapsed_ms, 250);

        let other = detector
            .detect_and_handle_loop("alpha", "x.process", &Boom("disk full"), &ctx)
            .unwrap();
        assert_eq!(other.loop_context.iteration, 1);

        assert_eq!(sink.count(events::LOOP_DETECTED), 1);
        assert_eq!(detector.active_loops().len(), 1);
    }

    #[test]
    fn blank_keys_are_rejected() {
        let (detector, _, _) = detector(RecoveryConfig::default());
        let ctx = Payload::new();
        assert_eq!(
            detector.detect_and_handle_loop(" ", "x", &Boom("e"), &ctx).unwrap_err(),
            DetectorError::MalformedKey { field: "agent_id" }
        );
        assert_eq!(
            detector.detect_and_handle_loop("alpha", "", &Boom("e"), &ctx).unwrap_err(),
            DetectorError::MalformedKey { field: "event_type" }
        );
    }

    #[test]
    fn breaker_opens_and_cools_down() {
        let config = RecoveryConfig::default().with_circuit_breaker_threshold(2);
        let (detector, clock, sink) = detector(config);

        detector.update_circuit_breaker("alpha", false);
        let status = detector.update_circuit_breaker("alpha", false);
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(sink.count(events::CIRCUIT_OPENED), 1);

        clock.advance(Duration::from_secs(60));
        assert_eq!(
            detector.circuit_breaker("alpha").unwrap().state,
            CircuitState::HalfOpen
        );

        let detection = detector
            .detect_and_handle_loop("alpha", "x.process", &Boom("e"), &Payload::new())
            .unwrap();
        assert_eq!(
            detection.enriched_context.recovery_context.circuit_breaker_status.state,
            CircuitState::HalfOpen
        );
        assert_eq!(sink.count(events::CIRCUIT_HALF_OPENED), 1);

        let closed = detector.update_circuit_breaker("alpha", true);
        assert_eq!(closed.state, CircuitState::Closed);
        assert_eq!(closed.failure_count, 0);
        assert_eq!(sink.count(events::CIRCUIT_CLOSED), 1);
    }

    #[test]
    fn health_tracks_failing_agents() {
        let config = RecoveryConfig {
            health_degraded_at: 2,
            health_critical_at: 3,
            ..RecoveryConfig::default()
        };
        let (detector, _, _) = detector(config);
        assert_eq!(detector.system_health().overall_status, HealthStatus::Nominal);

        detector.update_circuit_breaker("a", false);
        detector.update_circuit_breaker("b", false);
        assert_eq!(detector.system_health().overall_status, HealthStatus::Degraded);

        detector.update_circuit_breaker("c", false);
        assert_eq!(detector.system_health().overall_status, HealthStatus::Critical);

        detector.update_circuit_breaker("c", true);
        assert_eq!(detector.system_health().failing_agents, 2);
    }

    #[test]
    fn fallback_strategies_by_namespace() {
        let (detector, _, _) = detector(RecoveryConfig::default());
        let detection = detector
            .detect_and_handle_loop("alpha", "gpu.compute", &Boom("oom"), &Payload::new())
            .unwrap();
        assert_eq!(
            detection.enriched_context.recovery_context.fallback_strategies,
            vec!["cpu-execution", "reduced-batch-size"]
        );
        assert_eq!(detection.recovery_action, RecoveryAction::Degrade);
    }

    #[test]
    fn clearing_loops_is_per_agent() {
        let (detector, _, _) = detector(RecoveryConfig::default());
        let ctx = Payload::new();
        for _ in 0..2 {
            detector.detect_and_handle_loop("alpha", "x", &Boom("e"), &ctx).unwrap();
            detector.detect_and_handle_loop("beta", "x", &Boom("e"), &ctx).unwrap();
        }
        assert_eq!(detector.clear_loops_for("alpha"), 1);
        let remaining = detector.active_loops();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].agent_id, "beta");
    }
}
