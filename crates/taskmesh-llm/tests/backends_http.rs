//! HTTP-level backend tests against a mock provider server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use taskmesh_llm::{
    CompletionBackend, CompletionClient, CompletionRequest, LlmConfig, LlmProvider,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(provider: LlmProvider, base_url: &str) -> LlmConfig {
    let mut config = LlmConfig::new(provider, "test-model", "test-key");
    config.api_base_url = Some(base_url.to_string());
    config
}

#[tokio::test]
async fn test_claude_backend_parses_text_block_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": "plan ready"}],
            "usage": {"input_tokens": 12, "output_tokens": 5}
        })))
        .mount(&server)
        .await;

    let client = CompletionClient::new(config(LlmProvider::Claude, &server.uri()));
    let resp = client
        .complete(&CompletionRequest::new("decompose this"))
        .await
        .unwrap();

    assert_eq!(resp.content, "plan ready");
    assert_eq!(resp.usage.input_tokens, 12);
    assert_eq!(resp.usage.output_tokens, 5);
}

#[tokio::test]
async fn test_claude_backend_surfaces_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"type": "rate_limit_error"}
        })))
        .mount(&server)
        .await;

    let client = CompletionClient::new(config(LlmProvider::Claude, &server.uri()));
    let err = client
        .complete(&CompletionRequest::new("x"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("429"));
}

#[tokio::test]
async fn test_openai_backend_parses_choice_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "generated text"}}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 8}
        })))
        .mount(&server)
        .await;

    let client = CompletionClient::new(config(LlmProvider::OpenAi, &server.uri()));
    let resp = client
        .complete(&CompletionRequest::new("write a summary"))
        .await
        .unwrap();

    assert_eq!(resp.content, "generated text");
    assert_eq!(resp.usage.input_tokens, 20);
    assert_eq!(resp.usage.output_tokens, 8);
}

#[tokio::test]
async fn test_openai_backend_missing_content_is_llm_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": []
        })))
        .mount(&server)
        .await;

    let backend =
        taskmesh_llm::backends::OpenAiBackend::new(config(LlmProvider::OpenAi, &server.uri()));
    let err = backend
        .complete(&CompletionRequest::new("x"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no message content"));
}
