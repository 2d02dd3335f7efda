use crate::bookkeeper::AgentBookkeeper;
use std::future::Future;
use std::time::Instant;
use taskmesh_core::{AgentInfo, AgentRole, MeshResult, Task, TaskResult};
use tracing::warn;

/// The contract every worker variant (and the leader's agent surface)
/// implements. There is no base type: shared behavior is composed through
/// [`AgentBookkeeper`].
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    /// This worker's role.
    fn role(&self) -> AgentRole;

    /// Registers the worker in the shared registry and starts its
    /// periodic heartbeat.
    async fn initialize(&self) -> MeshResult<()>;

    /// Executes one task. Never returns an error: failures inside role
    /// logic are converted to a failed [`TaskResult`] with
    /// `retryable = true`.
    async fn execute(&self, task: &Task) -> TaskResult;

    /// The current registration record.
    async fn info(&self) -> AgentInfo;

    /// Refreshes the registration record immediately.
    async fn heartbeat(&self) -> MeshResult<()>;

    /// Halts the periodic heartbeat on shutdown.
    async fn stop_heartbeat(&self);
}

/// Runs `role_logic` for `task` under the shared execute guard: the
/// in-flight counter goes up on entry; on exit it comes down and the
/// completed/failed counter is bumped; any error becomes a failed result.
pub(crate) async fn execute_guarded<F>(
    bookkeeper: &AgentBookkeeper,
    task: &Task,
    role_logic: F,
) -> TaskResult
where
    F: Future<Output = MeshResult<serde_json::Value>>,
{
    let agent_id = bookkeeper.agent_id().await;
    bookkeeper.task_started().await;
    let start = Instant::now();

    let outcome = role_logic.await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(output) => TaskResult::success(&task.id, &agent_id, output, elapsed_ms),
        Err(e) => {
            warn!(task_id = %task.id, agent = %agent_id, error = %e, "Task execution failed");
            TaskResult::failure(&task.id, &agent_id, e.to_string(), elapsed_ms)
        }
    };

    bookkeeper.task_finished(result.success).await;
    result
}
