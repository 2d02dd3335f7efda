use crate::{MeshError, MeshResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The domain a task belongs to, which also selects the worker role that
/// can execute it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Structured extraction and assessment of input content.
    Analysis,
    /// Producing new content from a template and the input payload.
    Generation,
    /// Looking up scored items from the retrieval collaborator.
    Retrieval,
    /// Scoring content against explicit or deterministic criteria.
    Validation,
    /// Multi-step improvement of existing content (decomposed by the leader).
    Optimization,
    /// Cross-agent coordination work handled by the leader itself.
    Coordination,
    /// Any wire value this version does not recognize.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Analysis => "ANALYSIS",
            TaskType::Generation => "GENERATION",
            TaskType::Retrieval => "RETRIEVAL",
            TaskType::Validation => "VALIDATION",
            TaskType::Optimization => "OPTIMIZATION",
            TaskType::Coordination => "COORDINATION",
            TaskType::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Scheduling priority of a task. Orders `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work.
    Low,
    /// The default priority.
    #[default]
    Medium,
    /// Work that should jump ahead of the default queue.
    High,
    /// Work that preempts everything else in a mailbox.
    Critical,
}

impl TaskPriority {
    /// Numeric weight used in bus mailbox scoring.
    pub fn weight(&self) -> u8 {
        match self {
            TaskPriority::Low => 1,
            TaskPriority::Medium => 2,
            TaskPriority::High => 3,
            TaskPriority::Critical => 4,
        }
    }
}

/// Lifecycle status of a [`Task`].
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: once set they are
/// never mutated again (see [`Task::transition`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet picked up by the leader.
    Pending,
    /// Assigned to a worker but not yet started.
    Assigned,
    /// Being executed.
    InProgress,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished unsuccessfully. Terminal.
    Failed,
    /// Cancelled on request. Terminal; may be requested for any
    /// non-terminal task.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (append-stable).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// The input payload of a task: opaque structured data plus an optional
/// context map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInput {
    /// Opaque structured data for the executing worker.
    pub data: serde_json::Value,
    /// Optional context shared with subtasks produced by decomposition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl TaskInput {
    /// Creates an input carrying only `data`.
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            context: None,
        }
    }
}

/// The output payload written back onto a task when it reaches a terminal
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Whether the task succeeded.
    pub success: bool,
    /// Result data, when the task produced any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Human-readable error, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form metadata about the execution.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A unit of requested work with a lifecycle status.
///
/// Task ids are synthesized strings: `task-{seq}` for submitted tasks and
/// `{parent_id}-sub-{index}` for subtasks produced by decomposition. A
/// task's `child_task_ids` are exactly the ids of the subtasks produced by
/// its one decomposition, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Synthesized task id.
    pub id: String,
    /// The task's domain.
    pub task_type: TaskType,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Input payload.
    pub input: TaskInput,
    /// Output payload, set when the task reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    /// Id of the parent task, for subtasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    /// Ids of subtasks produced by this task's decomposition.
    #[serde(default)]
    pub child_task_ids: Vec<String>,
    /// Id of the worker this task is assigned to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    /// Number of retries consumed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Maximum retries permitted by recovery handling.
    pub max_retries: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time execution started, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Time the task reached a terminal state, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optional deadline. Advisory; nothing in the core enforces it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Task {
    /// Creates a new pending task.
    pub fn new(id: impl Into<String>, task_type: TaskType, input: TaskInput) -> Self {
        Self {
            id: id.into(),
            task_type,
            priority: TaskPriority::default(),
            status: TaskStatus::Pending,
            input,
            output: None,
            parent_task_id: None,
            child_task_ids: Vec::new(),
            assigned_agent_id: None,
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deadline: None,
            metadata: HashMap::new(),
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Marks this task as a subtask of `parent_id`.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_id.into());
        self
    }

    /// Attaches free-form metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Transitions the task to `next`.
    ///
    /// Terminal statuses are append-stable: transitioning a task that is
    /// already `Completed`, `Failed`, or `Cancelled` is rejected. Moving to
    /// a terminal status stamps `completed_at`; moving to `InProgress`
    /// stamps `started_at`.
    pub fn transition(&mut self, next: TaskStatus) -> MeshResult<()> {
        if self.status.is_terminal() {
            return Err(MeshError::Orchestrator(format!(
                "task {} is already terminal ({:?}), cannot transition to {:?}",
                self.id, self.status, next
            )));
        }
        if next == TaskStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }
}

/// The outcome a worker (or the leader, for an aggregate) produces for one
/// task. Written once, read many times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Id of the task this result belongs to.
    pub task_id: String,
    /// Whether execution succeeded.
    pub success: bool,
    /// Output data, when there is any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Wall-clock execution time of the producing agent, in milliseconds.
    pub execution_time_ms: u64,
    /// Id of the agent that produced this result.
    pub agent_id: String,
    /// Human-readable error, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a retry could plausibly succeed.
    pub retryable: bool,
}

impl TaskResult {
    /// Creates a successful result.
    pub fn success(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        output: serde_json::Value,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output: Some(output),
            execution_time_ms,
            agent_id: agent_id.into(),
            error: None,
            retryable: false,
        }
    }

    /// Creates a failed result. Failures default to `retryable = true`.
    pub fn failure(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: None,
            execution_time_ms,
            agent_id: agent_id.into(),
            error: Some(error.into()),
            retryable: true,
        }
    }

    /// Overrides the retryable flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// The plan mapping a task to its subtasks, their dependencies, and a
/// linearized execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDecomposition {
    /// The task that was decomposed.
    pub task: Task,
    /// The subtasks, in planner order.
    pub subtasks: Vec<Task>,
    /// Map from subtask id to the ids it depends on.
    pub dependencies: HashMap<String, Vec<String>>,
    /// Linearized execution order of subtask ids, as emitted by the planner.
    pub execution_order: Vec<String>,
}

impl TaskDecomposition {
    /// Checks referential integrity: every id in the dependency map and the
    /// execution order must name a subtask of this decomposition.
    ///
    /// The leader follows the planner's output without calling this on the
    /// hot path; it exists for callers that want the check.
    pub fn validate(&self) -> MeshResult<()> {
        let ids: std::collections::HashSet<&str> =
            self.subtasks.iter().map(|t| t.id.as_str()).collect();

        for (id, deps) in &self.dependencies {
            if !ids.contains(id.as_str()) {
                return Err(MeshError::Orchestrator(format!(
                    "dependency map references unknown subtask '{id}'"
                )));
            }
            for dep in deps {
                if !ids.contains(dep.as_str()) {
                    return Err(MeshError::Orchestrator(format!(
                        "subtask '{id}' depends on unknown subtask '{dep}'"
                    )));
                }
            }
        }

        for id in &self.execution_order {
            if !ids.contains(id.as_str()) {
                return Err(MeshError::Orchestrator(format!(
                    "execution order references unknown subtask '{id}'"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::new(id, TaskType::Analysis, TaskInput::default())
    }

    #[test]
    fn test_new_task_is_pending() {
        let t = task("task-1");
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.priority, TaskPriority::Medium);
        assert!(t.output.is_none());
        assert!(t.child_task_ids.is_empty());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Low < TaskPriority::Medium);
        assert!(TaskPriority::Medium < TaskPriority::High);
        assert!(TaskPriority::High < TaskPriority::Critical);
        assert_eq!(TaskPriority::Critical.weight(), 4);
    }

    #[test]
    fn test_transition_stamps_timestamps() {
        let mut t = task("task-1");
        t.transition(TaskStatus::InProgress).unwrap();
        assert!(t.started_at.is_some());
        assert!(t.completed_at.is_none());

        t.transition(TaskStatus::Completed).unwrap();
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_terminal_status_is_append_stable() {
        let mut t = task("task-1");
        t.transition(TaskStatus::Failed).unwrap();

        let err = t.transition(TaskStatus::Pending).unwrap_err();
        assert!(err.to_string().contains("already terminal"));
        assert_eq!(t.status, TaskStatus::Failed);
    }

    #[test]
    fn test_cancel_any_non_terminal() {
        let mut t = task("task-1");
        t.transition(TaskStatus::Assigned).unwrap();
        t.transition(TaskStatus::Cancelled).unwrap();
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert!(t.transition(TaskStatus::InProgress).is_err());
    }

    #[test]
    fn test_failure_result_defaults_retryable() {
        let r = TaskResult::failure("task-1", "worker-1", "boom", 12);
        assert!(!r.success);
        assert!(r.retryable);
        assert_eq!(r.error.as_deref(), Some("boom"));

        let r = r.with_retryable(false);
        assert!(!r.retryable);
    }

    #[test]
    fn test_task_type_unknown_fallback() {
        let t: TaskType = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(t, TaskType::Unknown);

        let t: TaskType = serde_json::from_str("\"OPTIMIZATION\"").unwrap();
        assert_eq!(t, TaskType::Optimization);
    }

    #[test]
    fn test_task_serialization_round_trip() {
        let mut t = task("task-9");
        t.metadata
            .insert("source".into(), serde_json::json!("api"));
        let json = serde_json::to_string(&t).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "task-9");
        assert_eq!(parsed.task_type, TaskType::Analysis);
        assert_eq!(parsed.metadata["source"], serde_json::json!("api"));
    }

    #[test]
    fn test_decomposition_validate_ok() {
        let parent = task("task-1");
        let a = task("task-1-sub-0");
        let b = task("task-1-sub-1");
        let decomposition = TaskDecomposition {
            task: parent,
            subtasks: vec![a, b],
            dependencies: HashMap::from([
                ("task-1-sub-0".to_string(), vec![]),
                ("task-1-sub-1".to_string(), vec!["task-1-sub-0".to_string()]),
            ]),
            execution_order: vec!["task-1-sub-0".to_string(), "task-1-sub-1".to_string()],
        };
        assert!(decomposition.validate().is_ok());
    }

    #[test]
    fn test_decomposition_validate_unknown_dependency() {
        let parent = task("task-1");
        let a = task("task-1-sub-0");
        let decomposition = TaskDecomposition {
            task: parent,
            subtasks: vec![a],
            dependencies: HashMap::from([(
                "task-1-sub-0".to_string(),
                vec!["task-1-sub-9".to_string()],
            )]),
            execution_order: vec!["task-1-sub-0".to_string()],
        };
        let err = decomposition.validate().unwrap_err();
        assert!(err.to_string().contains("task-1-sub-9"));
    }

    #[test]
    fn test_decomposition_validate_unknown_order_entry() {
        let parent = task("task-1");
        let a = task("task-1-sub-0");
        let decomposition = TaskDecomposition {
            task: parent,
            subtasks: vec![a],
            dependencies: HashMap::new(),
            execution_order: vec!["task-1-sub-7".to_string()],
        };
        assert!(decomposition.validate().is_err());
    }
}
