use crate::backends::claude::ClaudeBackend;
use crate::backends::openai::OpenAiBackend;
use crate::backends::{CompletionBackend, CompletionRequest, CompletionResponse};
use crate::config::{LlmConfig, LlmProvider};
use taskmesh_core::MeshResult;

/// Completion client that dispatches to the correct provider backend.
///
/// Uses the [`CompletionBackend`] trait to abstract away provider-specific
/// API differences.
pub struct CompletionClient {
    backend: Box<dyn CompletionBackend>,
}

impl CompletionClient {
    /// Creates a client for the configured provider.
    pub fn new(config: LlmConfig) -> Self {
        let backend: Box<dyn CompletionBackend> = match config.provider {
            LlmProvider::Claude => Box::new(ClaudeBackend::new(config)),
            LlmProvider::OpenAi => Box::new(OpenAiBackend::new(config)),
        };
        Self { backend }
    }

    /// Creates a client from a pre-built backend (for custom providers and
    /// deterministic test doubles).
    pub fn from_backend(backend: Box<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    /// Produces a completion for `request`.
    pub async fn complete(&self, request: &CompletionRequest) -> MeshResult<CompletionResponse> {
        self.backend.complete(request).await
    }
}
