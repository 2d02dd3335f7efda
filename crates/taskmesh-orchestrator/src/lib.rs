//! Task orchestration for taskmesh: leader, team monitor, and the
//! lifecycle API.
//!
//! Implements the leader-workers pattern: a submitted task is decomposed
//! into a dependency-ordered set of subtasks by the [`Leader`] (via the
//! completion service, with a fixed fallback plan), assigned to workers
//! over the bus, collected from the shared result ledger, and aggregated
//! with partial-failure semantics. The [`TeamMonitor`] turns self-reported
//! heartbeats into metrics and health records, and the [`Orchestrator`]
//! composes everything into the submit/execute/query/cancel surface.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Task lifecycle API and worker wiring.
//! - [`Leader`] — Decompose, assign, monitor, aggregate, recover.
//! - [`TeamMonitor`] — Heartbeat aggregation, health checks, agent logs.

/// Shared ledger key layout.
pub mod keys;
/// Decomposition, assignment, collection, aggregation, recovery.
pub mod leader;
/// Heartbeat aggregation and health checks.
pub mod monitor;
/// The task lifecycle API.
pub mod orchestrator;
/// Versioned bus payload envelopes.
pub mod payload;

pub use keys::{result_key, task_key};
pub use leader::{
    Assignment, AssignmentPlan, Leader, LeaderConfig, LeaderState, RecoveryStrategy,
};
pub use monitor::{AgentHealth, AgentLogEntry, MonitorConfig, TeamMetrics, TeamMonitor};
pub use orchestrator::{HealthReport, Orchestrator, OrchestratorConfig, TeamStatus};
pub use payload::{TaskAssignmentPayload, TaskResultPayload, CURRENT_SCHEMA_VERSION};
