//! Deterministic replay engine
//!
//! Resolves generation parameters per [`ComputationPath`], produces
//! replay responses, and keeps a content-addressed store of decision
//! snapshots that can later be reconstructed and verified.
//!
//! The store is a cache keyed by snapshot hash: storing a snapshot whose
//! hash already exists replaces the previous entry.

use crate::response::{DeterministicReplayConfig, ReplayResponse};
use crate::seed::{deterministic_seed, exploratory_seed};
use crate::snapshot::{inconsistency, snapshot_hash, verify_state_consistency, StateSnapshot};
use dashmap::DashMap;
use mesh_core::{
    events, AgentDecision, Clock, ComputationPath, ContentHash, Payload, ReplayError,
    ReplaySettings, SystemClock, TraceRecord, TraceSink, TracingSink,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const SOURCE: &str = "replay-engine";

/// Replays computations and stores decision snapshots
pub struct DeterministicReplayEngine {
    settings: ReplaySettings,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TraceSink>,
    step: AtomicU64,
    snapshots: DashMap<ContentHash, StateSnapshot>,
}

impl DeterministicReplayEngine {
    /// Engine on the system clock, tracing to `tracing`
    #[must_use]
    pub fn new(settings: ReplaySettings) -> Self {
        Self::with_parts(settings, Arc::new(SystemClock), Arc::new(TracingSink))
    }

    /// Engine with an explicit clock and trace sink
    #[must_use]
    pub fn with_parts(settings: ReplaySettings, clock: Arc<dyn Clock>, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            settings,
            clock,
            sink,
            step: AtomicU64::new(0),
            snapshots: DashMap::new(),
        }
    }

    /// Move the logical clock forward by one step
    ///
    /// Returns the new step. Critical-path seeds change only when the step
    /// does.
    pub fn advance_step(&self) -> u64 {
        self.step.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Current logical step
    #[must_use]
    pub fn current_step(&self) -> u64 {
        self.step.load(Ordering::SeqCst)
    }

    /// Resolve generation parameters for `input` on `path`
    #[must_use]
    pub fn resolve_config(&self, path: ComputationPath, input: &str) -> DeterministicReplayConfig {
        let (seed, temperature, max_tokens) = match path {
            ComputationPath::Critical => (
                deterministic_seed(self.settings.base_seed, self.current_step()),
                0.0,
                self.settings.critical_max_tokens,
            ),
            ComputationPath::NonCritical => (
                exploratory_seed(),
                self.settings.exploratory_temperature,
                self.settings.exploratory_max_tokens,
            ),
        };
        DeterministicReplayConfig {
            seed,
            temperature,
            max_tokens,
            context_hash: ContentHash::compute(input.as_bytes()),
            created_at: self.clock.now(),
            path,
        }
    }

    /// Replay `input` with parameters resolved for `path`
    ///
    /// Two critical replays of the same input in the same logical step are
    /// byte-identical.
    #[must_use]
    pub fn replay_with_consistency(&self, input: &str, path: ComputationPath) -> ReplayResponse {
        let config = self.resolve_config(path, input);
        self.replay_with_config(input, &config)
    }

    /// Replay `input` with explicit parameters
    #[must_use]
    pub fn replay_with_config(&self, input: &str, config: &DeterministicReplayConfig) -> ReplayResponse {
        let response = ReplayResponse::generate(input, config);
        tracing::debug!(
            path = ?config.path,
            seed = config.seed,
            hash = %response.hash.short(),
            "replay generated"
        );
        response
    }

    /// Capture `context` and `decision` as a snapshot and store it
    ///
    /// # Errors
    /// Returns [`ReplayError::Hashing`] if the context or decision cannot be
    /// encoded
    pub fn create_state_snapshot(
        &self,
        context: &Payload,
        decision: &AgentDecision,
        path: ComputationPath,
    ) -> Result<StateSnapshot, ReplayError> {
        let hash = snapshot_hash(context, decision)?;
        let replay_config = self.resolve_config(path, &canonical_context(context)?);
        let snapshot = StateSnapshot {
            hash,
            timestamp: self.clock.now(),
            context: context.clone(),
            decision: decision.clone(),
            replay_config,
        };

        let replaced = self.snapshots.insert(hash, snapshot.clone()).is_some();
        tracing::info!(
            hash = %hash.short(),
            decision_id = %decision.id,
            path = ?path,
            replaced,
            "state snapshot created"
        );
        metrics::counter!("mesh_snapshots_created_total").increment(1);
        self.sink.record(TraceRecord::new(
            snapshot.timestamp,
            events::SNAPSHOT_CREATED,
            SOURCE,
            serde_json::json!({
                "hash": hash,
                "decisionId": decision.id,
                "decisionType": decision.decision_type,
                "path": path,
                "replaced": replaced,
            }),
        ));
        Ok(snapshot)
    }

    /// Rebuild a snapshot from its stored replay config and verify it
    ///
    /// The decision's `id`, `type`, `payload` and `confidence` are copied and
    /// stamped with the current time. The reconstruction is not stored.
    ///
    /// # Errors
    /// Returns [`ReplayError::ReconstructionInconsistency`] if the rebuilt
    /// snapshot fails [`verify_state_consistency`]
    pub fn reconstruct_state(&self, checkpoint: &StateSnapshot) -> Result<StateSnapshot, ReplayError> {
        let input = canonical_context(&checkpoint.context)?;
        let response = self.replay_with_config(&input, &checkpoint.replay_config);

        let now = self.clock.now();
        let decision = checkpoint.decision.restamped(now);
        let reconstructed = StateSnapshot {
            hash: snapshot_hash(&checkpoint.context, &decision)?,
            timestamp: now,
            context: checkpoint.context.clone(),
            decision,
            replay_config: checkpoint.replay_config.clone(),
        };

        if let Some(reason) = inconsistency(checkpoint, &reconstructed) {
            tracing::error!(
                original = %checkpoint.hash.short(),
                reconstructed = %reconstructed.hash.short(),
                %reason,
                "reconstruction inconsistent"
            );
            return Err(ReplayError::ReconstructionInconsistency {
                original: checkpoint.hash,
                reconstructed: reconstructed.hash,
                reason,
            });
        }

        tracing::info!(hash = %reconstructed.hash.short(), "state reconstructed");
        self.sink.record(TraceRecord::new(
            now,
            events::RECONSTRUCTION_COMPLETED,
            SOURCE,
            serde_json::json!({
                "hash": reconstructed.hash,
                "decisionId": reconstructed.decision.id,
                "path": reconstructed.replay_config.path,
                "responseHash": response.hash,
            }),
        ));
        Ok(reconstructed)
    }

    /// Whether `reconstructed` is consistent with `original`
    #[inline]
    #[must_use]
    pub fn verify_state_consistency(&self, original: &StateSnapshot, reconstructed: &StateSnapshot) -> bool {
        verify_state_consistency(original, reconstructed)
    }

    /// Stored snapshot by hash
    #[must_use]
    pub fn snapshot(&self, hash: &ContentHash) -> Option<StateSnapshot> {
        self.snapshots.get(hash).map(|entry| entry.value().clone())
    }

    /// Every stored snapshot, oldest first
    #[must_use]
    pub fn snapshots(&self) -> Vec<StateSnapshot> {
        let mut all: Vec<StateSnapshot> = self
            .snapshots
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.hash.cmp(&b.hash)));
        all
    }

    /// Number of stored snapshots
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Settings in use
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }
}

impl std::fmt::Debug for DeterministicReplayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicReplayEngine")
            .field("settings", &self.settings)
            .field("step", &self.current_step())
            .field("snapshots", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}

fn canonical_context(context: &Payload) -> Result<String, ReplayError> {
    serde_json::to_string(context).map_err(|e| ReplayError::Hashing(e.into()))
}
