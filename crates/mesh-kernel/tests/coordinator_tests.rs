use mesh_core::{
    events, AgentRegistry, BufferedSink, ComputationPath, ManualClock, MeshConfig, Payload,
};
use mesh_kernel::{
    run_simulator, RecoveryCoordinator, SimulatorConfig, RETRY_DECISION_TYPE,
};
use mesh_recovery::RecoveryAction;
use mesh_test_utils::{payload, RecordingAgent, TestError};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn coordinator(registry: Arc<AgentRegistry>) -> (RecoveryCoordinator, Arc<ManualClock>, Arc<BufferedSink>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let sink = Arc::new(BufferedSink::new());
    let coordinator =
        RecoveryCoordinator::with_parts(&MeshConfig::default(), registry, clock.clone(), sink.clone());
    (coordinator, clock, sink)
}

#[tokio::test]
async fn test_retry_is_replayed_and_snapshotted() {
    let (coordinator, _, sink) = coordinator(Arc::new(AgentRegistry::new()));
    let context = payload([("job", "index-rebuild")]);

    let outcome = coordinator
        .handle_failure("alpha", "x.process", &TestError::new("timeout"), &context, ComputationPath::Critical)
        .await
        .unwrap();

    assert_eq!(outcome.action(), RecoveryAction::Retry);
    let replay = outcome.replay.unwrap();
    let snapshot = outcome.snapshot.unwrap();
    assert_eq!(snapshot.decision.decision_type, RETRY_DECISION_TYPE);
    assert_eq!(snapshot.decision.payload["seed"], replay.seed);
    assert_eq!(snapshot.context, context);
    assert!(outcome.propagation.is_none());
    assert_eq!(coordinator.replay().snapshot_count(), 1);
    assert_eq!(sink.count(events::SNAPSHOT_CREATED), 1);

    // The snapshot reconstructs cleanly
    coordinator.replay().reconstruct_state(&snapshot).unwrap();
}

#[tokio::test]
async fn test_critical_retries_are_reproducible_within_a_step() {
    let (coordinator, clock, _) = coordinator(Arc::new(AgentRegistry::new()));
    let context = payload([("job", "index-rebuild")]);

    let first = coordinator
        .handle_failure("alpha", "x.process", &TestError::new("timeout"), &context, ComputationPath::Critical)
        .await
        .unwrap();
    clock.advance(Duration::from_millis(10));
    let second = coordinator
        .handle_failure("beta", "x.process", &TestError::new("timeout"), &context, ComputationPath::Critical)
        .await
        .unwrap();

    assert_eq!(first.replay.unwrap().content, second.replay.unwrap().content);
}

#[tokio::test]
async fn test_fallback_is_propagated() {
    let registry = Arc::new(AgentRegistry::new());
    let beta = RecordingAgent::new();
    registry.register("alpha", ["gpu"], RecordingAgent::new());
    registry.register("beta", ["gpu"], beta.clone());
    let (coordinator, _, _) = coordinator(registry);

    let outcome = coordinator
        .handle_failure("alpha", "gpu.compute", &TestError::new("oom"), &Payload::new(), ComputationPath::NonCritical)
        .await
        .unwrap();

    assert_eq!(outcome.action(), RecoveryAction::Fallback);
    assert!(outcome.propagation.unwrap().success);
    assert!(outcome.replay.is_none());
    assert_eq!(beta.call_count(), 1);
}

#[tokio::test]
async fn test_degrade_passes_through() {
    let (coordinator, _, _) = coordinator(Arc::new(AgentRegistry::new()));
    let outcome = coordinator
        .handle_failure("alpha", "network.route", &TestError::new("reset"), &Payload::new(), ComputationPath::Critical)
        .await
        .unwrap();

    assert_eq!(outcome.action(), RecoveryAction::Degrade);
    assert_eq!(outcome.handling.fallback_strategy.as_deref(), Some("static-routing"));
    assert!(outcome.replay.is_none() && outcome.snapshot.is_none() && outcome.propagation.is_none());
}

#[tokio::test]
async fn test_blank_agent_is_rejected() {
    let (coordinator, _, _) = coordinator(Arc::new(AgentRegistry::new()));
    let err = coordinator
        .handle_failure(" ", "x.process", &TestError::new("boom"), &Payload::new(), ComputationPath::Critical)
        .await
        .unwrap_err();
    assert!(err.is_programmer_error());
}

#[tokio::test]
async fn test_simulator_is_deterministic_per_seed() {
    let config = SimulatorConfig {
        rounds: 120,
        ..SimulatorConfig::default()
    };
    let a = run_simulator(config.clone(), &MeshConfig::default()).await.unwrap();
    let b = run_simulator(config, &MeshConfig::default()).await.unwrap();

    assert_eq!(a.stats.events, 120);
    assert_eq!(a.stats.successes + a.stats.failures, 120);
    assert_eq!(a.actions, b.actions);
    assert_eq!(a.breakers, b.breakers);
    assert_eq!(a.snapshot_count, b.snapshot_count);
    assert_ne!(a.run_id, b.run_id);

    let decided: u64 = a.actions.values().sum();
    assert_eq!(decided, a.stats.failures);
    assert!(a.generate_text().contains("=== Actions ==="));
}

#[tokio::test]
async fn test_simulator_without_failures() {
    let config = SimulatorConfig {
        rounds: 30,
        failure_rate: 0.0,
        ..SimulatorConfig::default()
    };
    let report = run_simulator(config, &MeshConfig::default()).await.unwrap();
    assert_eq!(report.stats.failures, 0);
    assert_eq!(report.snapshot_count, 0);
    assert_eq!(report.action_count(RecoveryAction::Retry), 0);
}

#[test]
fn test_config_file_drives_the_coordinator() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "[recovery]\nmax_retries = 1\n\n[replay]\nbase_seed = 9\n"
    )
    .unwrap();

    let config = MeshConfig::from_file(file.path()).unwrap();
    assert_eq!(config.recovery.max_retries, 1);
    assert_eq!(config.replay.base_seed, 9);
    assert_eq!(config.recovery.circuit_breaker_threshold, 5);

    let coordinator = RecoveryCoordinator::new(&config, Arc::new(AgentRegistry::new()));
    assert_eq!(coordinator.recovery().config().max_retries, 1);
    assert_eq!(coordinator.replay().settings().base_seed, 9);
}
