use crate::bookkeeper::AgentBookkeeper;
use crate::worker::{execute_guarded, Worker};
use std::sync::Arc;
use taskmesh_core::{
    AgentInfo, AgentRole, Capability, MeshResult, Task, TaskResult,
};
use taskmesh_llm::Retriever;
use taskmesh_store::SharedStore;
use tracing::warn;

const DEFAULT_TOP_K: usize = 5;

/// Worker that delegates lookups to the retrieval collaborator.
///
/// A collaborator failure does not fail the task: the result carries an
/// empty item list with the error embedded in the output.
pub struct RetrievalWorker {
    bookkeeper: AgentBookkeeper,
    retriever: Arc<dyn Retriever>,
}

impl RetrievalWorker {
    /// Creates a retrieval worker with capacity for five concurrent tasks.
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn SharedStore>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        let info = AgentInfo::new(id, AgentRole::Retrieval, 5).with_capability(Capability::new(
            "scored_lookup",
            "Retrieve the top-k most relevant items for a query",
        ));
        Self {
            bookkeeper: AgentBookkeeper::new(store, info),
            retriever,
        }
    }

    async fn lookup(&self, task: &Task) -> MeshResult<serde_json::Value> {
        let data = &task.input.data;
        let query = data["query"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string());
        let top_k = data["top_k"].as_u64().map_or(DEFAULT_TOP_K, |k| k as usize);

        match self.retriever.retrieve(&query, top_k).await {
            Ok(items) => {
                let count = items.len();
                Ok(serde_json::json!({
                    "results": items,
                    "count": count,
                }))
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Retrieval collaborator failed");
                Ok(serde_json::json!({
                    "results": [],
                    "count": 0,
                    "error": e.to_string(),
                }))
            }
        }
    }
}

#[async_trait::async_trait]
impl Worker for RetrievalWorker {
    fn role(&self) -> AgentRole {
        AgentRole::Retrieval
    }

    async fn initialize(&self) -> MeshResult<()> {
        self.bookkeeper.register().await?;
        self.bookkeeper.start_heartbeat().await;
        Ok(())
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        execute_guarded(&self.bookkeeper, task, self.lookup(task)).await
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
    use taskmesh_llm::{KeywordRetriever, ScoredItem};
    use taskmesh_store::MemoryStore;

    struct Broken;

    #[async_trait::async_trait]
    impl Retriever for Broken {
        async fn retrieve(&self, _query: &str, _top_k: usize) -> MeshResult<Vec<ScoredItem>> {
            Err(MeshError::Http("search service unavailable".to_string()))
        }
    }

    fn task_with_query(query: &str) -> Task {
        Task::new(
            "task-1",
            TaskType::Retrieval,
            TaskInput::new(serde_json::json!({"query": query, "top_k": 2})),
        )
    }

    #[tokio::test]
    async fn test_returns_scored_items() {
        let retriever = Arc::new(KeywordRetriever::new());
        retriever.add_document("d1", "orchestration patterns").await;
        retriever.add_document("d2", "unrelated topic").await;

        let worker = RetrievalWorker::new("retrieval-worker-1", Arc::new(MemoryStore::new()), retriever);
        let result = worker.execute(&task_with_query("orchestration")).await;

        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["count"], 1);
        assert_eq!(output["results"][0]["id"], "d1");
    }

    #[tokio::test]
    async fn test_collaborator_failure_embeds_error() {
        let worker = RetrievalWorker::new(
            "retrieval-worker-1",
            Arc::new(MemoryStore::new()),
            Arc::new(Broken),
        );
        let result = worker.execute(&task_with_query("anything")).await;

        // The task itself succeeds; the failure lives in the output.
        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["count"], 0);
        assert!(output["error"]
            .as_str()
            .unwrap()
            .contains("search service unavailable"));
        assert_eq!(worker.info().await.completed_tasks, 1);
    }
}
