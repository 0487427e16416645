//! Agent collaborators and the capability registry
//!
//! The recovery core only ever needs one thing from an agent: a way to hand
//! it an event. Everything else it knows about an agent (its capability
//! tags) lives in the [`AgentRegistry`].

use crate::error::AgentError;
use crate::types::{event_namespace, Payload};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Event entry point of a retry target
#[async_trait]
pub trait MeshAgent: Send + Sync {
    /// Handle one event
    ///
    /// # Errors
    /// Returns [`AgentError`] if the agent could not process the event
    async fn handle_event(&self, event_type: &str, payload: Payload) -> Result<(), AgentError>;
}

/// Capability match between one tag and an event type or namespace
///
/// Either side containing the other counts as a match. Empty tags never match.
#[inline]
#[must_use]
pub fn tag_matches(tag: &str, target: &str) -> bool {
    let tag = tag.trim();
    !tag.is_empty() && (target.contains(tag) || tag.contains(target))
}

/// Whether an agent with `capabilities` may handle `event_type`
#[must_use]
pub fn can_agent_handle_event(capabilities: &[String], event_type: &str) -> bool {
    capabilities.iter().any(|tag| tag_matches(tag, event_type))
}

/// Registered agent
#[derive(Clone)]
pub struct RegisteredAgent {
    /// Agent id
    pub id: String,
    /// Declared capability tags
    pub capabilities: Vec<String>,
    handle: Arc<dyn MeshAgent>,
}

impl RegisteredAgent {
    /// Event entry point
    #[inline]
    #[must_use]
    pub fn handle(&self) -> Arc<dyn MeshAgent> {
        Arc::clone(&self.handle)
    }

    /// Whether this agent may handle `event_type`
    #[inline]
    #[must_use]
    pub fn can_handle(&self, event_type: &str) -> bool {
        can_agent_handle_event(&self.capabilities, event_type)
    }
}

impl std::fmt::Debug for RegisteredAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAgent")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Capability-indexed set of agents
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: DashMap<String, RegisteredAgent>,
}

impl AgentRegistry {
    /// Create an empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an agent
    ///
    /// Returns the previous registration under the same id, if any.
    pub fn register<I, S>(
        &self,
        id: impl Into<String>,
        capabilities: I,
        handle: Arc<dyn MeshAgent>,
    ) -> Option<RegisteredAgent>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        let agent = RegisteredAgent {
            id: id.clone(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            handle,
        };
        tracing::debug!(agent_id = %id, capabilities = ?agent.capabilities, "agent registered");
        self.agents.insert(id, agent)
    }

    /// Remove an agent
    pub fn unregister(&self, id: &str) -> Option<RegisteredAgent> {
        self.agents.remove(id).map(|(_, agent)| agent)
    }

    /// Look up an agent
    #[must_use]
    pub fn get(&self, id: &str) -> Option<RegisteredAgent> {
        self.agents.get(id).map(|entry| entry.value().clone())
    }

    /// Declared capabilities of an agent
    #[must_use]
    pub fn capabilities(&self, id: &str) -> Option<Vec<String>> {
        self.agents.get(id).map(|entry| entry.capabilities.clone())
    }

    /// All agent ids, sorted
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Agents other than `failing_agent` whose tags cover the namespace of
    /// `event_type`, sorted by id
    #[must_use]
    pub fn alternatives_for(&self, failing_agent: &str, event_type: &str) -> Vec<String> {
        let namespace = event_namespace(event_type);
        let mut ids: Vec<String> = self
            .agents
            .iter()
            .filter(|e| e.key() != failing_agent)
            .filter(|e| e.capabilities.iter().any(|tag| tag_matches(tag, namespace)))
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered agents
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
