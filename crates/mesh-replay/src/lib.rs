//! Mesh Replay - deterministic replay and decision snapshots
//!
//! - Critical computations replay bit-for-bit within a logical step
//! - Non-critical computations draw fresh seeds
//! - Decisions are snapshotted by content hash and can be reconstructed
//!   and verified later
//!
//! # Example
//! ```
//! use mesh_core::{ComputationPath, ReplaySettings};
//! use mesh_replay::DeterministicReplayEngine;
//!
//! let engine = DeterministicReplayEngine::new(ReplaySettings::default());
//! let a = engine.replay_with_consistency("route plan", ComputationPath::Critical);
//! let b = engine.replay_with_consistency("route plan", ComputationPath::Critical);
//! assert_eq!(a.content, b.content);
//! ```

#![warn(unreachable_pub)]

pub mod engine;
pub mod response;
pub mod seed;
pub mod snapshot;

pub use engine::DeterministicReplayEngine;
pub use response::{DeterministicReplayConfig, ReplayResponse};
pub use seed::{deterministic_seed, exploratory_seed, splitmix64};
pub use snapshot::{
    inconsistency, snapshot_hash, verify_state_consistency, StateSnapshot, CONFIDENCE_TOLERANCE,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
