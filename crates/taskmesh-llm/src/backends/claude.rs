use super::{CompletionBackend, CompletionRequest, CompletionResponse, TokenUsage};
use crate::config::LlmConfig;
use taskmesh_core::{MeshError, MeshResult};

/// Claude (Anthropic) API backend.
pub struct ClaudeBackend {
    config: LlmConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    /// Creates a backend for the given config.
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl CompletionBackend for ClaudeBackend {
    async fn complete(&self, request: &CompletionRequest) -> MeshResult<CompletionResponse> {
        let url = format!("{}/v1/messages", self.config.base_url());

        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
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
                "Claude API error {status}: {resp_body}"
            )));
        }

        let content = resp_body["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"] == "text")
                    .and_then(|b| b["text"].as_str())
            })
            .ok_or_else(|| MeshError::Llm(format!("Claude reply has no text block: {resp_body}")))?
            .to_string();

        let usage = TokenUsage {
            input_tokens: resp_body["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: resp_body["usage"]["output_tokens"].as_u64().unwrap_or(0),
        };

        Ok(CompletionResponse { content, usage })
    }
}
