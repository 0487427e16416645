//! Testing utilities for the mesh workspace
//!
//! Fake agents, error values and fixtures shared by the crates' tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mesh_core::{AgentDecision, AgentError, AgentRegistry, MeshAgent, Payload};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Error type handed to the recovery engine in tests
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TestError(pub String);

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Agent that accepts every event and remembers it
#[derive(Debug, Default)]
pub struct RecordingAgent {
    received: Mutex<Vec<(String, Payload)>>,
}

impl RecordingAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn received(&self) -> Vec<(String, Payload)> {
        self.received.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.received.lock().len()
    }
}

#[async_trait]
impl MeshAgent for RecordingAgent {
    async fn handle_event(&self, event_type: &str, payload: Payload) -> Result<(), AgentError> {
        self.received.lock().push((event_type.to_string(), payload));
        Ok(())
    }
}

/// Agent that rejects every event
#[derive(Debug)]
pub struct FailingAgent {
    message: String,
    calls: AtomicU32,
}

impl FailingAgent {
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeshAgent for FailingAgent {
    async fn handle_event(&self, _event_type: &str, _payload: Payload) -> Result<(), AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AgentError::Rejected(self.message.clone()))
    }
}

/// Agent that fails its first `failures` calls and succeeds afterwards
#[derive(Debug)]
pub struct FlakyAgent {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyAgent {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeshAgent for FlakyAgent {
    async fn handle_event(&self, _event_type: &str, _payload: Payload) -> Result<(), AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(AgentError::Unavailable(format!("warming up ({})", call + 1)))
        } else {
            Ok(())
        }
    }
}

/// Agent whose handler panics
#[derive(Debug, Default)]
pub struct PanickingAgent;

impl PanickingAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl MeshAgent for PanickingAgent {
    async fn handle_event(&self, event_type: &str, _payload: Payload) -> Result<(), AgentError> {
        panic!("handler exploded on {event_type}");
    }
}

/// Build a payload from `(key, value)` pairs
pub fn payload<I, K, V>(entries: I) -> Payload
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Fixed timestamp `secs` after the Unix epoch
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs)
}

/// Decision with a small payload and confidence 0.9
pub fn create_test_decision(id: &str) -> AgentDecision {
    AgentDecision::new(
        id,
        "classify",
        payload([("label", Value::from("cat")), ("score", Value::from(3))]),
        0.9,
        at(0),
    )
}

/// Registry with one recording agent per `(id, capabilities)` entry
pub fn registry_with(agents: &[(&str, &[&str])]) -> (Arc<AgentRegistry>, Vec<Arc<RecordingAgent>>) {
    let registry = Arc::new(AgentRegistry::new());
    let handles = agents
        .iter()
        .map(|(id, caps)| {
            let agent = RecordingAgent::new();
            registry.register(*id, caps.iter().copied(), agent.clone());
            agent
        })
        .collect();
    (registry, handles)
}
