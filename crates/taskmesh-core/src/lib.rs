//! Core types and error definitions for the taskmesh orchestration system.
//!
//! This crate provides the foundational types shared across all taskmesh
//! crates: the task data model, agent registration records, bus messages,
//! and the unified error enum.
//!
//! # Main types
//!
//! - [`MeshError`] — Unified error enum for all taskmesh subsystems.
//! - [`MeshResult`] — Convenience alias for `Result<T, MeshError>`.
//! - [`Task`] — A unit of requested work with a lifecycle status.
//! - [`TaskResult`] — The outcome a worker (or the leader) produces for a task.
//! - [`TaskDecomposition`] — A plan mapping a task to its subtasks.
//! - [`AgentInfo`] — A worker's or the leader's registration record.
//! - [`AgentMessage`] — A message exchanged over the bus.

/// Agent registration records, roles, and capabilities.
pub mod agent;
/// Bus message types and priorities.
pub mod message;
/// The task data model: tasks, results, and decompositions.
pub mod task;

pub use agent::{AgentInfo, AgentRole, AgentStatus, Capability};
pub use message::{AgentMessage, MessagePriority, MessageType};
pub use task::{
    Task, TaskDecomposition, TaskInput, TaskOutput, TaskPriority, TaskResult, TaskStatus, TaskType,
};

/// Top-level error type for the taskmesh system.
///
/// Each variant corresponds to a subsystem that can produce errors. The two
/// structured variants ([`MeshError::MailboxFull`] and
/// [`MeshError::RequestTimeout`]) are the transport errors the bus raises to
/// its immediate caller; everything else carries a human-readable string.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// An error from the shared store (get/set/sorted-set/list operations).
    #[error("Store error: {0}")]
    Store(String),

    /// An error from the message bus outside the two structured cases below.
    #[error("Bus error: {0}")]
    Bus(String),

    /// An error originating inside a worker agent.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error from the leader or the task lifecycle API.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error from the completion service or its backends.
    #[error("LLM error: {0}")]
    Llm(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A publish was rejected because the receiver's mailbox is at capacity.
    #[error("Mailbox for '{agent_id}' is full ({capacity} pending messages)")]
    MailboxFull {
        /// The agent whose mailbox rejected the message.
        agent_id: String,
        /// The configured mailbox capacity.
        capacity: usize,
    },

    /// A request/response exchange did not receive a response in time.
    #[error("Request {correlation_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The correlation id of the request that timed out.
        correlation_id: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`MeshError`].
pub type MeshResult<T> = Result<T, MeshError>;
