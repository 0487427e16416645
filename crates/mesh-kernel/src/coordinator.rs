//! End-to-end recovery flow
//!
//! ```text
//! failure -> RecoveryPolicyEngine::handle_error
//!   retry    -> replay the work on the caller's path, snapshot the decision
//!   fallback -> propagate the retry context to alternative agents
//!   other    -> return the decision as is
//! ```

use chrono::{DateTime, Utc};
use mesh_core::{
    AgentDecision, AgentRegistry, Clock, ComputationPath, MeshConfig, MeshError, Payload,
    SystemClock, TraceSink, TracingSink,
};
use mesh_recovery::{
    ErrorHandlingResult, PropagationOutcome, RecoveryAction, RecoveryPolicyEngine,
};
use mesh_replay::{DeterministicReplayEngine, ReplayResponse, StateSnapshot};
use serde_json::json;
use std::sync::Arc;

/// Decision type recorded for replayed retries
pub const RETRY_DECISION_TYPE: &str = "retry-replay";

/// What the coordinator did with one failure
#[derive(Debug, Clone)]
pub struct CoordinatedRecovery {
    /// The policy engine's decision
    pub handling: ErrorHandlingResult,
    /// Replay of the failed work; `retry` only
    pub replay: Option<ReplayResponse>,
    /// Snapshot of the retry decision; `retry` only
    pub snapshot: Option<StateSnapshot>,
    /// Fan-out to alternatives; `fallback` only
    pub propagation: Option<PropagationOutcome>,
}

impl CoordinatedRecovery {
    /// Chosen action
    #[inline]
    #[must_use]
    pub fn action(&self) -> RecoveryAction {
        self.handling.action
    }
}

/// Wires loop detection, recovery policy and replay together
#[derive(Debug)]
pub struct RecoveryCoordinator {
    recovery: RecoveryPolicyEngine,
    replay: DeterministicReplayEngine,
    clock: Arc<dyn Clock>,
}

impl RecoveryCoordinator {
    /// Coordinator on the system clock, tracing to `tracing`
    #[must_use]
    pub fn new(config: &MeshConfig, registry: Arc<AgentRegistry>) -> Self {
        Self::with_parts(config, registry, Arc::new(SystemClock), Arc::new(TracingSink))
    }

    /// Coordinator whose engines share `clock` and `sink`
    #[must_use]
    pub fn with_parts(
        config: &MeshConfig,
        registry: Arc<AgentRegistry>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        let recovery = RecoveryPolicyEngine::with_parts(
            config.recovery.clone(),
            registry,
            Arc::clone(&clock),
            Arc::clone(&sink),
        );
        let replay = DeterministicReplayEngine::with_parts(config.replay.clone(), Arc::clone(&clock), sink);
        Self {
            recovery,
            replay,
            clock,
        }
    }

    /// Run one failure through the whole recovery flow
    ///
    /// # Errors
    /// Returns [`MeshError::Detector`] for a blank agent id or event type and
    /// [`MeshError::Replay`] if the retry decision cannot be snapshotted
    pub async fn handle_failure(
        &self,
        agent_id: &str,
        event_type: &str,
        error: &(dyn std::error::Error + Send + Sync),
        context: &Payload,
        path: ComputationPath,
    ) -> Result<CoordinatedRecovery, MeshError> {
        let handling = self.recovery.handle_error(agent_id, event_type, error, context)?;
        let mut outcome = CoordinatedRecovery {
            handling,
            replay: None,
            snapshot: None,
            propagation: None,
        };

        match outcome.handling.action {
            RecoveryAction::Retry => {
                let input = replay_input(event_type, context);
                let response = self.replay.replay_with_consistency(&input, path);
                let decision = retry_decision(&outcome.handling, &response, self.clock.now());
                let snapshot = self.replay.create_state_snapshot(context, &decision, path)?;
                outcome.replay = Some(response);
                outcome.snapshot = Some(snapshot);
            }
            RecoveryAction::Fallback => {
                let retry_context = &outcome.handling.retry_context;
                let propagation = self
                    .recovery
                    .propagate_context_for_retry(retry_context, &retry_context.alternative_agents)
                    .await;
                outcome.propagation = Some(propagation);
            }
            RecoveryAction::Degrade | RecoveryAction::Fail | RecoveryAction::CircuitBreak => {}
        }

        tracing::debug!(agent_id, event_type, action = %outcome.action(), "failure coordinated");
        Ok(outcome)
    }

    /// Report a successful event handling
    pub fn report_success(&self, agent_id: &str) {
        self.recovery.report_success(agent_id);
    }

    /// Expire old retry history; returns the number removed
    pub fn cleanup(&self) -> usize {
        self.recovery.cleanup()
    }

    /// The recovery policy engine
    #[inline]
    #[must_use]
    pub fn recovery(&self) -> &RecoveryPolicyEngine {
        &self.recovery
    }

    /// The replay engine
    #[inline]
    #[must_use]
    pub fn replay(&self) -> &DeterministicReplayEngine {
        &self.replay
    }
}

fn replay_input(event_type: &str, context: &Payload) -> String {
    format!("{event_type}:{}", serde_json::Value::Object(context.clone()))
}

fn retry_decision(
    handling: &ErrorHandlingResult,
    response: &ReplayResponse,
    now: DateTime<Utc>,
) -> AgentDecision {
    let mut payload = Payload::new();
    payload.insert("responseHash".into(), json!(response.hash));
    payload.insert("seed".into(), json!(response.seed));
    payload.insert("attempt".into(), json!(handling.metadata.iteration_count));
    AgentDecision::new(
        handling.metadata.retry_context_key.clone(),
        RETRY_DECISION_TYPE,
        payload,
        1.0 - response.temperature / 2.0,
        now,
    )
}
