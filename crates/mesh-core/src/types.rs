//! Core types shared by the recovery and replay engines
//!
//! - Opaque event payloads
//! - Computation path classification
//! - Agent decisions
//! - Error signatures

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque key/value payload carried by events and decisions
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Determinism policy selector, supplied by the caller per computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputationPath {
    /// Must be bit-reproducible
    Critical,
    /// May vary run to run
    NonCritical,
}

impl ComputationPath {
    /// Whether this path requires reproducible output
    #[inline]
    #[must_use]
    pub fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl fmt::Display for ComputationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => f.write_str("CRITICAL"),
            Self::NonCritical => f.write_str("NON_CRITICAL"),
        }
    }
}

/// A decision made by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    /// Decision identifier
    pub id: String,
    /// Decision kind
    #[serde(rename = "type")]
    pub decision_type: String,
    /// Decision body
    pub payload: Payload,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
}

impl AgentDecision {
    /// Create a decision stamped with `timestamp`
    ///
    /// Confidence is clamped into `[0, 1]`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        decision_type: impl Into<String>,
        payload: Payload,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            decision_type: decision_type.into(),
            payload,
            confidence: clamp_confidence(confidence),
            timestamp,
        }
    }

    /// Copy of this decision with a different timestamp
    #[inline]
    #[must_use]
    pub fn restamped(&self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static regex"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Normalize an error message so that incidental numbers do not split a loop
///
/// Lower-cases, collapses digit runs to `#` and whitespace runs to one space.
#[must_use]
pub fn normalize_error_message(message: &str) -> String {
    let lowered = message.trim().to_lowercase();
    let digits = DIGIT_RUN.replace_all(&lowered, "#");
    WHITESPACE_RUN.replace_all(&digits, " ").into_owned()
}

/// Namespace prefix of an event type (`"gpu.compute"` -> `"gpu"`)
#[inline]
#[must_use]
pub fn event_namespace(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or(event_type)
}

/// Identity of "the same failure"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ErrorSignature {
    /// Failing agent
    pub agent_id: String,
    /// Event being handled when it failed
    pub event_type: String,
    /// Normalized error message
    pub error_pattern: String,
}

impl ErrorSignature {
    /// Derive the signature for a failure
    #[must_use]
    pub fn new(agent_id: &str, event_type: &str, error_message: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            event_type: event_type.to_string(),
            error_pattern: normalize_error_message(error_message),
        }
    }
}

impl fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.agent_id, self.event_type, self.error_pattern
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_numbers_and_spaces() {
        assert_eq!(
            normalize_error_message("  Timeout after 1532ms\n on  shard 7 "),
            "timeout after #ms on shard #"
        );
    }

    #[test]
    fn signatures_match_across_incidental_numbers() {
        let a = ErrorSignature::new("alpha", "x.process", "timeout after 1532ms");
        let b = ErrorSignature::new("alpha", "x.process", "Timeout after 980ms");
        assert_eq!(a, b);

        let c = ErrorSignature::new("alpha", "x.process", "connection refused");
        assert_ne!(a, c);
    }

    #[test]
    fn namespace_prefix() {
        assert_eq!(event_namespace("gpu.compute.batch"), "gpu");
        assert_eq!(event_namespace("plain"), "plain");
    }

    #[test]
    fn decision_confidence_is_clamped() {
        let now = Utc::now();
        assert_eq!(AgentDecision::new("d", "t", Payload::new(), 1.7, now).confidence, 1.0);
        assert_eq!(AgentDecision::new("d", "t", Payload::new(), f64::NAN, now).confidence, 0.0);
    }

    #[test]
    fn decision_serializes_type_field() {
        let decision = AgentDecision::new("d1", "route", Payload::new(), 0.5, Utc::now());
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["type"], "route");
    }

    #[test]
    fn path_display() {
        assert_eq!(ComputationPath::Critical.to_string(), "CRITICAL");
        assert!(!ComputationPath::NonCritical.is_critical());
    }
}
