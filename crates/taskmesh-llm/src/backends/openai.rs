use super::{CompletionBackend, CompletionRequest, CompletionResponse, TokenUsage};
use crate::config::LlmConfig;
use taskmesh_core::{MeshError, MeshResult};

/// OpenAI-compatible API backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: LlmConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Creates a backend for the given config.
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, request: &CompletionRequest) -> MeshResult<CompletionResponse> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());

        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MeshError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MeshError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(MeshError::Http(format!(
                "OpenAI API error {status}: {resp_body}"
            )));
        }

        let content = resp_body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                MeshError::Llm(format!("OpenAI reply has no message content: {resp_body}"))
            })?
            .to_string();

        let usage = TokenUsage {
            input_tokens: resp_body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: resp_body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        Ok(CompletionResponse { content, usage })
    }
}
