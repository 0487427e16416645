//! Mesh Core - shared vocabulary of the recovery core
//!
//! Types every other mesh crate speaks:
//! - Payloads, decisions, computation paths and error signatures
//! - Content hashing for replay and snapshots
//! - Error taxonomy
//! - Configuration
//! - Clock and trace sink abstractions
//! - The agent collaborator trait and capability registry

#![warn(unreachable_pub)]

pub mod agent;
pub mod clock;
pub mod config;
pub mod error;
pub mod hash;
pub mod trace;
pub mod types;

pub use agent::{can_agent_handle_event, tag_matches, AgentRegistry, MeshAgent, RegisteredAgent};
pub use clock::{elapsed_between, Clock, ManualClock, SystemClock};
pub use config::{MeshConfig, RecoveryConfig, ReplaySettings};
pub use error::{AgentError, ConfigError, DetectorError, MeshError, ReplayError};
pub use hash::{ContentHash, HashError};
pub use trace::{
    events, BufferedSink, ChannelSink, NullSink, TraceMetadata, TraceRecord, TraceSink,
    TracingSink,
};
pub use types::{
    event_namespace, normalize_error_message, AgentDecision, ComputationPath, ErrorSignature,
    Payload,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
