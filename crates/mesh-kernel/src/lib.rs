//! Mesh Kernel - recovery coordinator, simulator and CLI support
//!
//! Wires the loop detector, recovery policy engine and replay engine into
//! a single [`RecoveryCoordinator`], and drives it from a seeded
//! [`simulator`] for the `mesh-kernel` binary.

#![warn(unreachable_pub)]

pub mod coordinator;
pub mod simulator;
pub mod telemetry;

pub use coordinator::{CoordinatedRecovery, RecoveryCoordinator, RETRY_DECISION_TYPE};
pub use simulator::{run_simulator, SimulatedWorker, SimulatorConfig, SimulatorReport, SimulatorStats};
pub use telemetry::{init_tracing, LogFormat};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
