//! Completion-service and retrieval collaborators for taskmesh.
//!
//! The orchestration core treats the language-model completion service as
//! an opaque `complete(prompt) -> text` call and the retrieval service as
//! `retrieve(query, top_k) -> scored items`. This crate provides those two
//! seams: a [`CompletionBackend`] trait with provider backends dispatched
//! by [`CompletionClient`], and a [`Retriever`] trait with an in-memory
//! keyword implementation.

/// Provider backends for the completion service.
pub mod backends;
/// Provider dispatch wrapper.
pub mod client;
/// Provider selection and model configuration.
pub mod config;
/// Tolerant JSON extraction from model replies.
pub mod json;
/// The retrieval collaborator seam.
pub mod retrieval;

pub use backends::{CompletionBackend, CompletionRequest, CompletionResponse, TokenUsage};
pub use client::CompletionClient;
pub use config::{LlmConfig, LlmProvider};
pub use json::extract_json;
pub use retrieval::{KeywordRetriever, Retriever, ScoredItem};
