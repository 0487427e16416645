//! Trace records for recovery state changes
//!
//! Every loop detection, breaker flip, recovery decision, snapshot and
//! reconstruction is reported to a [`TraceSink`]. The record shape is
//! structural only: timestamp, event name, opaque payload, source agent.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Event names emitted by the core
pub mod events {
    /// A failure repeated an existing signature
    pub const LOOP_DETECTED: &str = "loop.detected";
    /// A breaker moved to `open`
    pub const CIRCUIT_OPENED: &str = "circuit_breaker.opened";
    /// A breaker moved to `half-open`
    pub const CIRCUIT_HALF_OPENED: &str = "circuit_breaker.half_opened";
    /// A breaker moved to `closed`
    pub const CIRCUIT_CLOSED: &str = "circuit_breaker.closed";
    /// The policy engine chose an action
    pub const RECOVERY_DECIDED: &str = "recovery.decided";
    /// A retry context was fanned out to alternative agents
    pub const RETRY_PROPAGATED: &str = "retry.propagated";
    /// Retry history entries were expired
    pub const RETRY_HISTORY_CLEANED: &str = "retry_history.cleaned";
    /// A decision snapshot was stored
    pub const SNAPSHOT_CREATED: &str = "snapshot.created";
    /// A snapshot was reconstructed and verified
    pub const RECONSTRUCTION_COMPLETED: &str = "reconstruction.completed";
}

/// Trace record metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetadata {
    /// Agent (or component) the change concerns
    pub source_agent: String,
}

/// One observable state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    /// When the change happened
    pub timestamp: DateTime<Utc>,
    /// Event name, see [`events`]
    pub event_type: String,
    /// Opaque event body
    pub payload: serde_json::Value,
    /// Origin
    pub metadata: TraceMetadata,
}

impl TraceRecord {
    /// Create a record
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        event_type: impl Into<String>,
        source_agent: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            timestamp,
            event_type: event_type.into(),
            payload,
            metadata: TraceMetadata {
                source_agent: source_agent.into(),
            },
        }
    }
}

/// Destination for trace records
///
/// Implementations must not block; the core calls `record` inline while
/// applying state changes.
pub trait TraceSink: Send + Sync + std::fmt::Debug {
    /// Accept one record
    fn record(&self, record: TraceRecord);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&self, _record: TraceRecord) {}
}

/// Writes each record as a structured `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, record: TraceRecord) {
        tracing::info!(
            target: "mesh::trace",
            event = %record.event_type,
            source_agent = %record.metadata.source_agent,
            timestamp = %record.timestamp.to_rfc3339(),
            payload = %record.payload,
            "mesh trace"
        );
    }
}

/// Forwards records onto an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<TraceRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TraceRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TraceSink for ChannelSink {
    fn record(&self, record: TraceRecord) {
        if self.sender.send(record).is_err() {
            tracing::debug!("trace receiver dropped; record discarded");
        }
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct BufferedSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl BufferedSink {
    /// Create an empty buffer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    #[must_use]
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }

    /// Records with the given event name
    #[must_use]
    pub fn records_of(&self, event_type: &str) -> Vec<TraceRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }

    /// How many records carry the given event name
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event_type == event_type)
            .count()
    }

    /// Remove and return everything
    pub fn drain(&self) -> Vec<TraceRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl TraceSink for BufferedSink {
    fn record(&self, record: TraceRecord) {
        self.records.lock().push(record);
    }
}
