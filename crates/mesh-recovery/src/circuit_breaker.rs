//! Per-agent circuit breaker state machine
//!
//! ```text
//! closed --(failures >= threshold)--> open
//! open --(recovery timeout elapsed)--> half-open
//! half-open --(failure)--> open
//! any --(success)--> closed, failure_count = 0
//! ```
//!
//! All transitions are pure functions of the current status, the time and
//! the configured limits; no I/O happens here.

use chrono::{DateTime, Utc};
use mesh_core::{clock::elapsed_between, events};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Dispatching normally
    #[default]
    Closed,
    /// Dispatching stopped
    Open,
    /// Cooldown elapsed, next outcome decides
    HalfOpen,
}

impl CircuitState {
    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change worth reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before
    pub from: CircuitState,
    /// State after
    pub to: CircuitState,
}

impl Transition {
    /// Trace event name for this transition
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self.to {
            CircuitState::Open => events::CIRCUIT_OPENED,
            CircuitState::HalfOpen => events::CIRCUIT_HALF_OPENED,
            CircuitState::Closed => events::CIRCUIT_CLOSED,
        }
    }
}

/// Breaker status for one agent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStatus {
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub failure_count: u32,
    /// Time of the most recent failure
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerStatus {
    /// State as it should be observed at `now`
    ///
    /// An open breaker whose last failure is at least `recovery_timeout` old
    /// reads as half-open.
    #[must_use]
    pub fn effective_state(&self, now: DateTime<Utc>, recovery_timeout: Duration) -> CircuitState {
        match (self.state, self.last_failure_at) {
            (CircuitState::Open, Some(last)) if elapsed_between(last, now) >= recovery_timeout => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    /// Apply the time-based `open -> half-open` transition if it is due
    pub fn observe(&mut self, now: DateTime<Utc>, recovery_timeout: Duration) -> Option<Transition> {
        let next = self.effective_state(now, recovery_timeout);
        self.move_to(next)
    }

    /// Record one failure at `now`
    ///
    /// Callers apply [`observe`](Self::observe) first so that a failure after
    /// the cooldown is seen by a half-open breaker.
    pub fn record_failure(&mut self, now: DateTime<Utc>, threshold: u32) -> Option<Transition> {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);
        let next = match self.state {
            CircuitState::Closed if self.failure_count >= threshold => CircuitState::Open,
            CircuitState::Closed => CircuitState::Closed,
            CircuitState::HalfOpen | CircuitState::Open => CircuitState::Open,
        };
        self.move_to(next)
    }

    /// Record one success
    pub fn record_success(&mut self) -> Option<Transition> {
        self.failure_count = 0;
        self.move_to(CircuitState::Closed)
    }

    /// Whether any failure is outstanding
    #[inline]
    #[must_use]
    pub fn is_failing(&self) -> bool {
        self.failure_count > 0
    }

    fn move_to(&mut self, next: CircuitState) -> Option<Transition> {
        if next == self.state {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to: next,
        };
        self.state = next;
        Some(transition)
    }
}
