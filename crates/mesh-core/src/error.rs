//! Error types for the recovery core
//!
//! Most failures are absorbed by policy and surface as a recovery action,
//! not an error. What remains here:
//! - Malformed detector keys (programmer error, never retried)
//! - Reconstruction inconsistencies (correctness violation)
//! - Collaborator failures returned from `handle_event`
//! - Configuration loading failures

use crate::hash::{ContentHash, HashError};

/// Top-level error for the mesh
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// Loop detector rejected its input
    #[error("loop detector error: {0}")]
    Detector(#[from] DetectorError),

    /// Replay or reconstruction failed
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),

    /// A collaborator failed
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MeshError {
    /// Caller bug rather than a runtime condition
    #[inline]
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::Detector(DetectorError::MalformedKey { .. }))
    }

    /// Whether re-invoking the same work may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Agent(AgentError::Timeout { .. } | AgentError::Unavailable(_))
        )
    }
}

/// Loop detector errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectorError {
    /// `agent_id` or `event_type` was empty
    #[error("malformed failure key: missing {field}")]
    MalformedKey {
        /// Name of the missing field
        field: &'static str,
    },
}

/// Replay and reconstruction errors
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Reconstructed state does not match the original snapshot
    #[error("reconstruction inconsistent with {original} (got {reconstructed}): {reason}")]
    ReconstructionInconsistency {
        /// Hash of the original snapshot
        original: ContentHash,
        /// Hash of the reconstructed snapshot
        reconstructed: ContentHash,
        /// Which check failed
        reason: String,
    },

    /// Decision could not be encoded for hashing
    #[error("snapshot hashing failed: {0}")]
    Hashing(#[from] HashError),
}

impl ReplayError {
    /// Whether this is the reconstruction consistency failure
    #[inline]
    #[must_use]
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, Self::ReconstructionInconsistency { .. })
    }
}

/// Failure reported by a collaborator's `handle_event`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// Handler ran and rejected the event
    #[error("handler rejected event: {0}")]
    Rejected(String),

    /// Handler exceeded its own time budget
    #[error("handler timed out after {after_ms}ms")]
    Timeout {
        /// Elapsed budget in milliseconds
        after_ms: u64,
    },

    /// Handler is not reachable
    #[error("agent unavailable: {0}")]
    Unavailable(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse failure
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML parse failure
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Extension is neither TOML nor YAML
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Parsed but semantically invalid
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_key_is_programmer_error() {
        let err = MeshError::from(DetectorError::MalformedKey { field: "agent_id" });
        assert!(err.is_programmer_error());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("missing agent_id"));
    }

    #[test]
    fn agent_errors_retryability() {
        assert!(MeshError::from(AgentError::Timeout { after_ms: 10 }).is_retryable());
        assert!(MeshError::from(AgentError::Unavailable("down".into())).is_retryable());
        assert!(!MeshError::from(AgentError::Rejected("bad".into())).is_retryable());
    }

    #[test]
    fn inconsistency_display() {
        let err = ReplayError::ReconstructionInconsistency {
            original: ContentHash::compute(b"a"),
            reconstructed: ContentHash::compute(b"b"),
            reason: "hash mismatch".into(),
        };
        assert!(err.is_inconsistency());
        assert!(err.to_string().contains("hash mismatch"));
    }
}
