use serde::{Deserialize, Serialize};

/// The completion-service provider behind [`crate::CompletionClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic messages API.
    Claude,
    /// OpenAI-compatible chat completions API (OpenAI, OpenRouter, Groq,
    /// Ollama, local proxies).
    OpenAi,
}

/// Configuration for a completion-service connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Which provider protocol to speak.
    pub provider: LlmProvider,
    /// Model identifier, e.g. `claude-sonnet-4-5`.
    pub model_id: String,
    /// API key for the provider.
    pub api_key: String,
    /// Override of the provider's default base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    /// Default sampling temperature for requests that do not set one.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Default token budget for requests that do not set one.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl LlmConfig {
    /// Creates a config with the serde defaults for temperature and budget.
    pub fn new(provider: LlmProvider, model_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            api_key: api_key.into(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    /// The base URL to call: the override if set, else the provider default.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                LlmProvider::Claude => "https://api.anthropic.com",
                LlmProvider::OpenAi => "https://api.openai.com",
            }
        }
    }
}
