use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::task::TaskType;

/// Role of an agent in the multi-agent system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Decomposes tasks, delegates to workers, aggregates results.
    Leader,
    /// Structured extraction and assessment.
    Analysis,
    /// Template-driven content generation.
    Generation,
    /// Scored lookup through the retrieval collaborator.
    Retrieval,
    /// Criteria-based scoring and deterministic checks.
    Validation,
}

impl AgentRole {
    /// The task type this role executes, if it executes one directly.
    /// The leader handles [`TaskType::Coordination`] itself.
    pub fn task_type(&self) -> TaskType {
        match self {
            AgentRole::Leader => TaskType::Coordination,
            AgentRole::Analysis => TaskType::Analysis,
            AgentRole::Generation => TaskType::Generation,
            AgentRole::Retrieval => TaskType::Retrieval,
            AgentRole::Validation => TaskType::Validation,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Leader => write!(f, "leader"),
            AgentRole::Analysis => write!(f, "analysis"),
            AgentRole::Generation => write!(f, "generation"),
            AgentRole::Retrieval => write!(f, "retrieval"),
            AgentRole::Validation => write!(f, "validation"),
        }
    }
}

/// Self-reported status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// Registered and able to take work.
    Idle,
    /// Currently executing at least one task.
    Busy,
    /// The last execution ended in an unhandled error.
    Error,
    /// Shutting down or shut down.
    Offline,
}

/// A capability an agent advertises in its registration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Short capability name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Optional JSON schema of the expected input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// Optional JSON schema of the produced output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

impl Capability {
    /// Creates a capability with no schemas.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            output_schema: None,
        }
    }
}

/// A worker's or the leader's registration record.
///
/// Created at process start (self-registration), refreshed on every
/// heartbeat, and expired from the shared store by TTL if heartbeats stop.
/// All counters are self-reported; nothing authenticates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent id, e.g. `analysis-worker-1`.
    pub id: String,
    /// The agent's role.
    pub role: AgentRole,
    /// Self-reported status.
    pub status: AgentStatus,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Maximum concurrent tasks this agent wants to run. A scheduling
    /// preference: the assignment algorithm respects it, but nothing
    /// prevents other code paths from exceeding it.
    pub max_concurrent_tasks: u32,
    /// Tasks currently in flight.
    pub current_task_count: u32,
    /// Time of the last heartbeat refresh.
    pub last_heartbeat: DateTime<Utc>,
    /// Cumulative completed-task count.
    pub completed_tasks: u64,
    /// Cumulative failed-task count.
    pub failed_tasks: u64,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentInfo {
    /// Creates a fresh idle registration record.
    pub fn new(id: impl Into<String>, role: AgentRole, max_concurrent_tasks: u32) -> Self {
        Self {
            id: id.into(),
            role,
            status: AgentStatus::Idle,
            capabilities: Vec::new(),
            max_concurrent_tasks,
            current_task_count: 0,
            last_heartbeat: Utc::now(),
            completed_tasks: 0,
            failed_tasks: 0,
            metadata: HashMap::new(),
        }
    }

    /// Adds an advertised capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Whether this agent has spare capacity under its own preference.
    pub fn has_capacity(&self) -> bool {
        self.current_task_count < self.max_concurrent_tasks
    }
}
