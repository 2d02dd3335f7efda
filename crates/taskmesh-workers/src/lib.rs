//! Role-specialized worker agents for the taskmesh system.
//!
//! Four worker variants (analysis, generation, retrieval, validation)
//! implement one [`Worker`] contract. Shared bookkeeping (registration,
//! heartbeats, task counters) lives in the composed [`AgentBookkeeper`]
//! rather than a base type. Role logic never lets an error escape
//! `execute`: every failure is converted into a failed, well-formed
//! [`taskmesh_core::TaskResult`] with `retryable = true`.

/// Structured-extraction worker.
pub mod analysis;
/// Registration, heartbeat, and counter bookkeeping shared by all agents.
pub mod bookkeeper;
/// Template-driven content generation worker.
pub mod generation;
/// Retrieval-collaborator worker.
pub mod retrieval;
/// Criteria-scoring and deterministic-check worker.
pub mod validation;
/// The worker contract.
pub mod worker;

pub use analysis::AnalysisWorker;
pub use bookkeeper::{agent_key, AgentBookkeeper, BookkeeperConfig};
pub use generation::{ContentKind, GenerationWorker};
pub use retrieval::RetrievalWorker;
pub use validation::ValidationWorker;
pub use worker::Worker;
