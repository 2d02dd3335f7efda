use crate::bookkeeper::AgentBookkeeper;
use crate::worker::{execute_guarded, Worker};
use std::sync::Arc;
use taskmesh_core::{
    AgentInfo, AgentRole, Capability, MeshResult, Task, TaskResult,
};
use taskmesh_llm::{CompletionClient, CompletionRequest};
use taskmesh_store::SharedStore;
use tracing::debug;

/// The kind of content a generation task asks for, parsed from the
/// input's `content_type` field. Unrecognized tags resolve to
/// [`ContentKind::Unknown`], which has its own explicit template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A short condensation of the source material.
    Summary,
    /// A longer treatment that elaborates on the source material.
    Expansion,
    /// A rephrasing that preserves meaning but changes register.
    Rewrite,
    /// Free-form generation with no special framing.
    Generic,
    /// Any tag this version does not recognize.
    Unknown,
}

impl ContentKind {
    /// Parses a wire tag. Absent tags are [`ContentKind::Generic`];
    /// unrecognized ones are [`ContentKind::Unknown`].
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            None => ContentKind::Generic,
            Some("summary") => ContentKind::Summary,
            Some("expansion") => ContentKind::Expansion,
            Some("rewrite") => ContentKind::Rewrite,
            Some("generic") => ContentKind::Generic,
            Some(_) => ContentKind::Unknown,
        }
    }

    /// The wire tag this kind serializes back to.
    pub fn tag(&self) -> &'static str {
        match self {
            ContentKind::Summary => "summary",
            ContentKind::Expansion => "expansion",
            ContentKind::Rewrite => "rewrite",
            ContentKind::Generic => "generic",
            ContentKind::Unknown => "unknown",
        }
    }

    /// Renders the prompt template for this kind.
    fn render(&self, source: &str, instructions: &str) -> String {
        match self {
            ContentKind::Summary => format!(
                "Write a concise summary of the following material. Keep it \
                 under 120 words and preserve every concrete fact.\n\n{source}"
            ),
            ContentKind::Expansion => format!(
                "Expand the following material into a fuller treatment. Add \
                 structure and connective prose, but do not invent facts.\n\n{source}"
            ),
            ContentKind::Rewrite => format!(
                "Rewrite the following material with the same meaning in a \
                 clear, professional register.\n\n{source}"
            ),
            ContentKind::Generic => format!(
                "Produce the requested content.\n\nInstructions: {instructions}\n\n\
                 Material:\n{source}"
            ),
            ContentKind::Unknown => format!(
                "The requested content type was not recognized. Produce a \
                 reasonable best-effort response to the instructions below, and \
                 state any assumptions you make.\n\nInstructions: {instructions}\n\n\
                 Material:\n{source}"
            ),
        }
    }
}

/// Worker that renders one of several prompt templates keyed by the
/// task's content kind and calls the completion service.
pub struct GenerationWorker {
    bookkeeper: AgentBookkeeper,
    llm: Arc<CompletionClient>,
}

impl GenerationWorker {
    /// Creates a generation worker with capacity for two concurrent tasks.
    pub fn new(id: impl Into<String>, store: Arc<dyn SharedStore>, llm: Arc<CompletionClient>) -> Self {
        let info = AgentInfo::new(id, AgentRole::Generation, 2).with_capability(Capability::new(
            "content_generation",
            "Generate summaries, expansions, and rewrites of input material",
        ));
        Self {
            bookkeeper: AgentBookkeeper::new(store, info),
            llm,
        }
    }

    async fn generate(&self, task: &Task) -> MeshResult<serde_json::Value> {
        let data = &task.input.data;
        let kind = ContentKind::from_tag(data["content_type"].as_str());
        let source = data["content"].as_str().unwrap_or_default();
        let instructions = data["instructions"].as_str().unwrap_or_default();

        debug!(task_id = %task.id, kind = kind.tag(), "Rendering generation prompt");

        let request = CompletionRequest::new(kind.render(source, instructions));
        let response = self.llm.complete(&request).await?;

        Ok(serde_json::json!({
            "content": response.content,
            "content_type": kind.tag(),
        }))
    }
}

#[async_trait::async_trait]
impl Worker for GenerationWorker {
    fn role(&self) -> AgentRole {
        AgentRole::Generation
    }

    async fn initialize(&self) -> MeshResult<()> {
        self.bookkeeper.register().await?;
        self.bookkeeper.start_heartbeat().await;
        Ok(())
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        execute_guarded(&self.bookkeeper, task, self.generate(task)).await
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
    use taskmesh_core::{TaskInput, TaskType};
    use taskmesh_llm::{CompletionBackend, CompletionResponse, TokenUsage};
    use taskmesh_store::MemoryStore;
    use tokio::sync::Mutex;

    /// Backend that records the prompt it was given.
    struct Capturing {
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl CompletionBackend for Capturing {
        async fn complete(&self, request: &CompletionRequest) -> MeshResult<CompletionResponse> {
            self.prompts.lock().await.push(request.prompt.clone());
            Ok(CompletionResponse {
                content: "generated".to_string(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn worker_with_capture() -> (GenerationWorker, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let worker = GenerationWorker::new(
            "generation-worker-1",
            Arc::new(MemoryStore::new()),
            Arc::new(CompletionClient::from_backend(Box::new(Capturing {
                prompts: Arc::clone(&prompts),
            }))),
        );
        (worker, prompts)
    }

    fn task_with(data: serde_json::Value) -> Task {
        Task::new("task-1", TaskType::Generation, TaskInput::new(data))
    }

    #[test]
    fn test_content_kind_parsing() {
        assert_eq!(ContentKind::from_tag(Some("summary")), ContentKind::Summary);
        assert_eq!(ContentKind::from_tag(Some("rewrite")), ContentKind::Rewrite);
        assert_eq!(ContentKind::from_tag(None), ContentKind::Generic);
        assert_eq!(
            ContentKind::from_tag(Some("interpretive-dance")),
            ContentKind::Unknown
        );
    }

    #[tokio::test]
    async fn test_summary_template_selected() {
        let (worker, prompts) = worker_with_capture();
        let result = worker
            .execute(&task_with(serde_json::json!({
                "content_type": "summary",
                "content": "a long report",
            })))
            .await;

        assert!(result.success);
        assert_eq!(result.output.unwrap()["content_type"], "summary");
        let prompts = prompts.lock().await;
        assert!(prompts[0].contains("concise summary"));
        assert!(prompts[0].contains("a long report"));
    }

    #[tokio::test]
    async fn test_unknown_tag_uses_fallback_template() {
        let (worker, prompts) = worker_with_capture();
        let result = worker
            .execute(&task_with(serde_json::json!({
                "content_type": "hologram",
                "content": "text",
                "instructions": "do something",
            })))
            .await;

        assert!(result.success);
        assert_eq!(result.output.unwrap()["content_type"], "unknown");
        assert!(prompts.lock().await[0].contains("was not recognized"));
    }

    #[tokio::test]
    async fn test_missing_tag_is_generic() {
        let (worker, prompts) = worker_with_capture();
        worker
            .execute(&task_with(serde_json::json!({"content": "text"})))
            .await;
        assert!(prompts.lock().await[0].contains("Produce the requested content"));
    }
}
