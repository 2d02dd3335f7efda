/// Anthropic messages API backend.
pub mod claude;
/// OpenAI-compatible chat completions backend.
pub mod openai;

pub use claude::ClaudeBackend;
pub use openai::OpenAiBackend;

use serde::{Deserialize, Serialize};
use taskmesh_core::MeshResult;

/// A single completion request: a prompt with sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The full prompt text.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token budget.
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Creates a request with moderate defaults.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the output token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced in the reply.
    pub output_tokens: u64,
}

/// The reply to a [`CompletionRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated text.
    pub content: String,
    /// Provider token accounting.
    pub usage: TokenUsage,
}

/// Provider seam for the completion service.
///
/// To add a provider: implement this trait in `backends/` and wire it into
/// [`crate::CompletionClient`].
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Produces a completion for `request`.
    async fn complete(&self, request: &CompletionRequest) -> MeshResult<CompletionResponse>;
}
