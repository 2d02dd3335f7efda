use crate::bookkeeper::AgentBookkeeper;
use crate::worker::{execute_guarded, Worker};
use std::sync::Arc;
use taskmesh_core::{
    AgentInfo, AgentRole, Capability, MeshResult, Task, TaskResult,
};
use taskmesh_llm::{extract_json, CompletionClient, CompletionRequest};
use taskmesh_store::SharedStore;

/// Worker that extracts structured data from input content via the
/// completion service.
pub struct AnalysisWorker {
    bookkeeper: AgentBookkeeper,
    llm: Arc<CompletionClient>,
}

impl AnalysisWorker {
    /// Creates an analysis worker with capacity for three concurrent tasks.
    pub fn new(id: impl Into<String>, store: Arc<dyn SharedStore>, llm: Arc<CompletionClient>) -> Self {
        let info = AgentInfo::new(id, AgentRole::Analysis, 3).with_capability(Capability::new(
            "structured_extraction",
            "Extract structured fields and an assessment from input content",
        ));
        Self {
            bookkeeper: AgentBookkeeper::new(store, info),
            llm,
        }
    }

    fn build_prompt(task: &Task) -> String {
        let content = task.input.data["content"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| task.input.data.to_string());

        format!(
            "Analyze the following content and reply with ONLY a JSON object \
             containing: \"summary\" (one paragraph), \"key_points\" (array of \
             strings), \"entities\" (array of strings), and \"assessment\" \
             (object with \"strengths\" and \"weaknesses\" arrays).\n\n\
             Content:\n{content}"
        )
    }

    async fn analyze(&self, task: &Task) -> MeshResult<serde_json::Value> {
        let request = CompletionRequest::new(Self::build_prompt(task)).with_temperature(0.2);
        let response = self.llm.complete(&request).await?;

        // A reply that is not valid JSON does not fail the task: the raw
        // text is returned under a parse-error marker.
        match extract_json(&response.content) {
            Ok(value) => Ok(value),
            Err(_) => Ok(serde_json::json!({
                "raw": response.content,
                "parse_error": true,
            })),
        }
    }
}

#[async_trait::async_trait]
impl Worker for AnalysisWorker {
    fn role(&self) -> AgentRole {
        AgentRole::Analysis
    }

    async fn initialize(&self) -> MeshResult<()> {
        self.bookkeeper.register().await?;
        self.bookkeeper.start_heartbeat().await;
        Ok(())
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        execute_guarded(&self.bookkeeper, task, self.analyze(task)).await
    }

    async fn info(&self) -> AgentInfo {
        self.bookkeeper.snapshot().await
    }

    async fn heartbeat(&self) -> MeshResult<()> {
        self.bookkeeper.heartbeat().await
    }

    async fn stop_heartbeat(&self) {
        self.bookkeeper.stop_heartbeat().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use taskmesh_core::{MeshError, TaskInput, TaskType};
    use taskmesh_llm::{CompletionBackend, CompletionResponse, TokenUsage};
    use taskmesh_store::MemoryStore;

    struct Scripted(String);

    #[async_trait::async_trait]
    impl CompletionBackend for Scripted {
        async fn complete(&self, _request: &CompletionRequest) -> MeshResult<CompletionResponse> {
            Ok(CompletionResponse {
                content: self.0.clone(),
                usage: TokenUsage::default(),
            })
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl CompletionBackend for Failing {
        async fn complete(&self, _request: &CompletionRequest) -> MeshResult<CompletionResponse> {
            Err(MeshError::Http("connection refused".to_string()))
        }
    }

    fn worker(backend: Box<dyn CompletionBackend>) -> AnalysisWorker {
        AnalysisWorker::new(
            "analysis-worker-1",
            Arc::new(MemoryStore::new()),
            Arc::new(CompletionClient::from_backend(backend)),
        )
    }

    fn task() -> Task {
        Task::new(
            "task-1",
            TaskType::Analysis,
            TaskInput::new(serde_json::json!({"content": "six years of backend work"})),
        )
    }

    #[tokio::test]
    async fn test_parses_structured_reply() {
        let worker = worker(Box::new(Scripted(
            r#"{"summary": "solid", "key_points": ["backend"]}"#.to_string(),
        )));
        let result = worker.execute(&task()).await;
        assert!(result.success);
        assert_eq!(result.output.unwrap()["summary"], "solid");
        assert_eq!(worker.info().await.completed_tasks, 1);
    }

    #[tokio::test]
    async fn test_unparseable_reply_succeeds_with_marker() {
        let worker = worker(Box::new(Scripted("I could not produce JSON".to_string())));
        let result = worker.execute(&task()).await;
        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["parse_error"], true);
        assert_eq!(output["raw"], "I could not produce JSON");
    }

    #[tokio::test]
    async fn test_completion_failure_becomes_retryable_result() {
        let worker = worker(Box::new(Failing));
        let result = worker.execute(&task()).await;
        assert!(!result.success);
        assert!(result.retryable);
        assert!(result.error.unwrap().contains("connection refused"));
        assert_eq!(worker.info().await.failed_tasks, 1);
        assert_eq!(worker.info().await.current_task_count, 0);
    }
}
