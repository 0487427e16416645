//! Decision snapshots and their consistency rules
//!
//! A snapshot hash covers the context and the decision's semantic content
//! (`id`, `type`, `payload`, `confidence`). The decision timestamp is not
//! hashed, so a reconstruction stamped at a later time still hashes equal.

use crate::response::DeterministicReplayConfig;
use chrono::{DateTime, Utc};
use mesh_core::{AgentDecision, ContentHash, HashError, Payload};
use serde::{Deserialize, Serialize};

/// Largest confidence drift tolerated on the non-critical path
pub const CONFIDENCE_TOLERANCE: f64 = 0.1;

/// Immutable capture of a context and the decision made from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Content hash of context and decision
    pub hash: ContentHash,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Context the decision was made from
    pub context: Payload,
    /// The decision
    pub decision: AgentDecision,
    /// Replay parameters resolved for the context
    pub replay_config: DeterministicReplayConfig,
}

#[derive(Serialize)]
struct DecisionContent<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    decision_type: &'a str,
    payload: &'a Payload,
    confidence: f64,
}

/// Hash of a context and a decision, ignoring the decision timestamp
///
/// # Errors
/// Returns [`HashError::Serialization`] if either side cannot be encoded
pub fn snapshot_hash(context: &Payload, decision: &AgentDecision) -> Result<ContentHash, HashError> {
    let context_bytes = serde_json::to_vec(context)?;
    let decision_bytes = serde_json::to_vec(&DecisionContent {
        id: &decision.id,
        decision_type: &decision.decision_type,
        payload: &decision.payload,
        confidence: decision.confidence,
    })?;
    Ok(ContentHash::of_parts(&[&context_bytes, &decision_bytes]))
}

/// Why two snapshots disagree, or `None` if they are consistent
///
/// The rules follow the original snapshot's path:
/// - critical: hashes, decision types and payloads must all match
/// - non-critical: decision types must match and confidence may drift by
///   less than [`CONFIDENCE_TOLERANCE`]
#[must_use]
pub fn inconsistency(original: &StateSnapshot, reconstructed: &StateSnapshot) -> Option<String> {
    let (a, b) = (&original.decision, &reconstructed.decision);
    if a.decision_type != b.decision_type {
        return Some(format!(
            "decision type changed from {:?} to {:?}",
            a.decision_type, b.decision_type
        ));
    }

    if original.replay_config.path.is_critical() {
        if original.hash != reconstructed.hash {
            return Some("content hash changed".to_string());
        }
        if a.payload != b.payload {
            return Some("decision payload changed".to_string());
        }
    } else {
        let drift = (a.confidence - b.confidence).abs();
        if drift.is_nan() || drift >= CONFIDENCE_TOLERANCE {
            return Some(format!("confidence drifted by {drift:.3}"));
        }
    }
    None
}

/// Whether `reconstructed` is consistent with `original`
#[inline]
#[must_use]
pub fn verify_state_consistency(original: &StateSnapshot, reconstructed: &StateSnapshot) -> bool {
    inconsistency(original, reconstructed).is_none()
}
