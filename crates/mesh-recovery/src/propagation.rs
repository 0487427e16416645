//! Fan-out of retry contexts to alternative agents
//!
//! Each target is dispatched independently and concurrently. A target that
//! is unknown, lacks the capability, returns an error or panics is recorded
//! as a failed result; nothing is propagated to the caller. A target that
//! succeeds has its own breaker closed in a single atomic update, so an
//! abandoned fan-out never leaves a breaker half-written.

use crate::action::RecoveryAction;
use crate::policy::{ErrorHandlingResult, RecoveryPolicyEngine};
use crate::retry::AgentRetryContext;
use futures::future::join_all;
use futures::FutureExt;
use mesh_core::{events, MeshError, Payload, TraceRecord};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Reason recorded for a target whose capabilities do not cover the event
pub const CANNOT_HANDLE_EVENT: &str = "cannot handle event type";

/// Reason recorded for a target missing from the registry
pub const AGENT_NOT_REGISTERED: &str = "agent not registered";

/// Outcome for one target agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationResult {
    /// Target agent
    pub agent_id: String,
    /// Whether the target handled the event
    pub success: bool,
    /// Failure reason
    pub error: Option<String>,
}

impl PropagationResult {
    fn succeeded(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            success: true,
            error: None,
        }
    }

    fn failed(agent_id: &str, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a whole fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationOutcome {
    /// At least one target succeeded
    pub success: bool,
    /// Per-target results, in target order
    pub results: Vec<PropagationResult>,
}

impl PropagationOutcome {
    /// Targets that handled the event
    #[must_use]
    pub fn succeeded_agents(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.agent_id.as_str())
            .collect()
    }
}

impl RecoveryPolicyEngine {
    /// Dispatch a retry context to each target agent
    ///
    /// Targets whose capability tags do not match the event type are skipped
    /// with [`CANNOT_HANDLE_EVENT`]. The overall outcome succeeds if any
    /// target did.
    pub async fn propagate_context_for_retry(
        &self,
        retry_context: &AgentRetryContext,
        target_agents: &[String],
    ) -> PropagationOutcome {
        let dispatches = target_agents
            .iter()
            .map(|target| self.dispatch(retry_context, target));
        let results = join_all(dispatches).await;
        let success = results.iter().any(|r| r.success);

        tracing::info!(
            agent_id = %retry_context.agent_id,
            event_type = %retry_context.event_type,
            targets = target_agents.len(),
            succeeded = results.iter().filter(|r| r.success).count(),
            "retry context propagated"
        );
        self.sink.record(TraceRecord::new(
            self.clock.now(),
            events::RETRY_PROPAGATED,
            retry_context.agent_id.as_str(),
            serde_json::json!({
                "eventType": retry_context.event_type,
                "retryAttempt": retry_context.retry_attempt,
                "success": success,
                "results": results,
            }),
        ));

        PropagationOutcome { success, results }
    }

    /// Handle a failure and, for `fallback`, propagate it right away
    ///
    /// Propagation targets are the alternative agents found during
    /// enrichment. Other actions return without dispatching anything.
    ///
    /// # Errors
    /// Returns [`MeshError::Detector`] if `agent_id` or `event_type` is blank
    pub async fn handle_and_propagate(
        &self,
        agent_id: &str,
        event_type: &str,
        error: &(dyn std::error::Error + Send + Sync),
        context: &Payload,
    ) -> Result<(ErrorHandlingResult, Option<PropagationOutcome>), MeshError> {
        let result = self.handle_error(agent_id, event_type, error, context)?;
        if result.action != RecoveryAction::Fallback {
            return Ok((result, None));
        }

        let targets = result.retry_context.alternative_agents.clone();
        let outcome = self
            .propagate_context_for_retry(&result.retry_context, &targets)
            .await;
        Ok((result, Some(outcome)))
    }

    async fn dispatch(&self, retry_context: &AgentRetryContext, target: &str) -> PropagationResult {
        let Some(agent) = self.registry.get(target) else {
            tracing::debug!(target_agent = target, "propagation target not registered");
            return PropagationResult::failed(target, AGENT_NOT_REGISTERED);
        };
        if !agent.can_handle(&retry_context.event_type) {
            tracing::debug!(
                target_agent = target,
                event_type = %retry_context.event_type,
                "propagation target lacks capability"
            );
            return PropagationResult::failed(target, CANNOT_HANDLE_EVENT);
        }

        let payload = retry_context.payload_for(target);
        let handle = agent.handle();
        let call = handle.handle_event(&retry_context.event_type, payload);

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => {
                self.close_breaker(target);
                PropagationResult::succeeded(target)
            }
            Ok(Err(err)) => {
                tracing::warn!(target_agent = target, error = %err, "alternative agent failed");
                PropagationResult::failed(target, err.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(target_agent = target, panic = %message, "alternative agent panicked");
                PropagationResult::failed(target, format!("agent panicked: {message}"))
            }
        }
    }

    fn close_breaker(&self, agent_id: &str) {
        let lock = self.detector.agent_lock(agent_id);
        let _serialized = lock.lock();
        self.detector.update_circuit_breaker(agent_id, true);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
