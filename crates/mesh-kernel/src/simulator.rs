//! Seeded simulation of a failing agent mesh
//!
//! A handful of fake workers (gpu, neural, deployment, network) fail at a
//! configurable rate. Every failure is fed through the
//! [`RecoveryCoordinator`]; successes are reported back. Time is a
//! [`ManualClock`] advanced by a fixed tick per round, so a given seed
//! always produces the same action histogram.

use crate::coordinator::RecoveryCoordinator;
use async_trait::async_trait;
use mesh_core::{
    AgentError, AgentRegistry, BufferedSink, ComputationPath, ManualClock, MeshAgent, MeshConfig,
    MeshError, Payload,
};
use mesh_recovery::{CircuitState, HealthStatus, RecoveryAction};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Events dispatched
    pub rounds: u64,
    /// Probability that a worker fails an event
    pub failure_rate: f64,
    /// Path retries are replayed on
    pub path: ComputationPath,
    /// Simulated time per round
    pub tick: Duration,
    /// Rounds between retry-history cleanups and replay steps
    pub cleanup_every: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            rounds: 200,
            failure_rate: 0.3,
            path: ComputationPath::Critical,
            tick: Duration::from_secs(1),
            cleanup_every: 50,
        }
    }
}

/// Worker ids, capability namespace and the event they handle
const WORKERS: [(&str, &str, &str); 6] = [
    ("gpu-worker-1", "gpu", "gpu.compute"),
    ("gpu-worker-2", "gpu", "gpu.compute"),
    ("neural-worker", "neural", "neural.train"),
    ("deploy-worker", "deployment", "deployment.rollout"),
    ("net-worker-1", "network", "network.route"),
    ("net-worker-2", "network", "network.route"),
];

/// Failure messages per namespace
fn failure_messages(namespace: &str) -> &'static [&'static str] {
    match namespace {
        "gpu" => &["cuda out of memory", "device lost after 1024 kernels"],
        "neural" => &["loss diverged at epoch 17", "checkpoint corrupted"],
        "deployment" => &["health check failed on 3 replicas", "image pull timed out"],
        _ => &["connection reset by peer", "route table stale"],
    }
}

/// Fake worker that fails at random
#[derive(Debug)]
pub struct SimulatedWorker {
    namespace: &'static str,
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedWorker {
    /// Worker for `namespace` with its own seeded generator
    #[must_use]
    pub fn new(namespace: &'static str, failure_rate: f64, seed: u64) -> Self {
        Self {
            namespace,
            failure_rate: if failure_rate.is_nan() { 0.0 } else { failure_rate.clamp(0.0, 1.0) },
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl MeshAgent for SimulatedWorker {
    async fn handle_event(&self, _event_type: &str, _payload: Payload) -> Result<(), AgentError> {
        let failure = {
            let mut rng = self.rng.lock();
            if rng.random_bool(self.failure_rate) {
                let messages = failure_messages(self.namespace);
                Some(messages[rng.random_range(0..messages.len())])
            } else {
                None
            }
        };
        match failure {
            Some(message) => Err(AgentError::Rejected(message.to_string())),
            None => Ok(()),
        }
    }
}

/// Statistics for a simulation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    /// Events dispatched
    pub events: u64,
    /// Events handled on the first try
    pub successes: u64,
    /// Events that failed
    pub failures: u64,
    /// Fallback fan-outs where some alternative succeeded
    pub propagations_succeeded: u64,
    /// Retry contexts expired by cleanup
    pub history_expired: usize,
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    /// Run identifier
    pub run_id: Uuid,
    /// Configuration the run used
    pub config: SimulatorConfig,
    /// Counters
    pub stats: SimulatorStats,
    /// Chosen recovery actions by name
    pub actions: BTreeMap<String, u64>,
    /// Breaker state per agent at the end
    pub breakers: BTreeMap<String, CircuitState>,
    /// Mesh health at the end
    pub system_health: HealthStatus,
    /// Snapshots held by the replay engine
    pub snapshot_count: usize,
    /// Trace records emitted
    pub trace_records: usize,
}

impl SimulatorReport {
    /// Times `action` was chosen
    #[must_use]
    pub fn action_count(&self, action: RecoveryAction) -> u64 {
        self.actions.get(action.as_str()).copied().unwrap_or(0)
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Mesh Recovery Simulation ===\n");
        let _ = writeln!(report, "Run: {}", self.run_id);
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Path: {:?}", self.config.path);
        let _ = writeln!(report, "Events: {}", self.stats.events);
        let _ = writeln!(report, "Successes: {}", self.stats.successes);
        let _ = writeln!(report, "Failures: {}", self.stats.failures);
        let _ = writeln!(report, "Successful propagations: {}", self.stats.propagations_succeeded);
        let _ = writeln!(report, "Retry contexts expired: {}", self.stats.history_expired);
        let _ = writeln!(report, "Snapshots: {}", self.snapshot_count);
        let _ = writeln!(report, "Trace records: {}", self.trace_records);
        let _ = writeln!(report, "System health: {:?}", self.system_health);

        report.push_str("\n=== Actions ===\n");
        for (action, count) in &self.actions {
            let _ = writeln!(report, "{action:>14}: {count}");
        }

        report.push_str("\n=== Circuit Breakers ===\n");
        for (agent, state) in &self.breakers {
            let _ = writeln!(report, "{agent:>14}: {state}");
        }
        report
    }
}

/// Run the simulation
///
/// # Errors
/// Returns [`MeshError`] if the coordinator rejects a failure, which only
/// happens on malformed keys or snapshot encoding failures
pub async fn run_simulator(
    config: SimulatorConfig,
    mesh_config: &MeshConfig,
) -> Result<SimulatorReport, MeshError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let clock = Arc::new(ManualClock::at_epoch());
    let sink = Arc::new(BufferedSink::new());
    let registry = Arc::new(AgentRegistry::new());

    for ((id, namespace, _), ordinal) in WORKERS.iter().zip(1u64..) {
        let worker_seed = config.seed ^ ordinal.wrapping_mul(0x9E37_79B9);
        registry.register(
            *id,
            [*namespace],
            Arc::new(SimulatedWorker::new(*namespace, config.failure_rate, worker_seed)),
        );
    }

    let coordinator =
        RecoveryCoordinator::with_parts(mesh_config, Arc::clone(&registry), clock.clone(), sink.clone());
    let mut stats = SimulatorStats::default();
    let mut actions: BTreeMap<String, u64> = RecoveryAction::ALL
        .iter()
        .map(|a| (a.as_str().to_string(), 0))
        .collect();

    for round in 1..=config.rounds {
        clock.advance(config.tick);
        let (agent_id, _, event_type) = WORKERS[rng.random_range(0..WORKERS.len())];
        let Some(agent) = registry.get(agent_id) else {
            continue;
        };

        let mut context = Payload::new();
        context.insert("round".into(), round.into());
        context.insert("batch".into(), rng.random_range(1u64..=64).into());

        stats.events += 1;
        match agent.handle().handle_event(event_type, context.clone()).await {
            Ok(()) => {
                stats.successes += 1;
                coordinator.report_success(agent_id);
            }
            Err(err) => {
                stats.failures += 1;
                let outcome = coordinator
                    .handle_failure(agent_id, event_type, &err, &context, config.path)
                    .await?;
                *actions.entry(outcome.action().as_str().to_string()).or_default() += 1;
                if outcome.propagation.as_ref().is_some_and(|p| p.success) {
                    stats.propagations_succeeded += 1;
                }
            }
        }

        if config.cleanup_every > 0 && round % config.cleanup_every == 0 {
            stats.history_expired += coordinator.cleanup();
            coordinator.replay().advance_step();
        }
    }

    let state = coordinator.recovery().system_state();
    let breakers = state
        .circuit_breakers
        .iter()
        .map(|(id, status)| (id.clone(), status.state))
        .collect();

    let report = SimulatorReport {
        run_id: Uuid::new_v4(),
        config,
        stats,
        actions,
        breakers,
        system_health: state.system_health.overall_status,
        snapshot_count: coordinator.replay().snapshot_count(),
        trace_records: sink.records().len(),
    };
    tracing::info!(
        run_id = %report.run_id,
        events = report.stats.events,
        failures = report.stats.failures,
        "simulation finished"
    );
    Ok(report)
}
