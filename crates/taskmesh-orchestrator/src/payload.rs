use serde::{Deserialize, Serialize};
use taskmesh_core::{MeshError, MeshResult, Task, TaskResult};

/// Version stamped into every bus payload envelope this build writes.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

fn check_version(kind: &str, found: u32) -> MeshResult<()> {
    if found != CURRENT_SCHEMA_VERSION {
        return Err(MeshError::Bus(format!(
            "{kind} payload has schema version {found}, expected {CURRENT_SCHEMA_VERSION}"
        )));
    }
    Ok(())
}

/// Envelope of a `TaskAssignment` message payload.
///
/// Parsing is strict: a missing or unknown `schema_version` is an error,
/// never a silent partial parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentPayload {
    /// Envelope version.
    pub schema_version: u32,
    /// The subtask being assigned.
    pub task: Task,
}

impl TaskAssignmentPayload {
    /// Wraps a task in a current-version envelope.
    pub fn new(task: Task) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            task,
        }
    }

    /// Serializes the envelope to a message payload.
    pub fn to_value(&self) -> MeshResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses and version-checks a message payload.
    pub fn parse(value: &serde_json::Value) -> MeshResult<Self> {
        let envelope: Self = serde_json::from_value(value.clone())?;
        check_version("assignment", envelope.schema_version)?;
        Ok(envelope)
    }
}

/// Envelope of a `TaskResult` message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultPayload {
    /// Envelope version.
    pub schema_version: u32,
    /// The produced result.
    pub result: TaskResult,
}

impl TaskResultPayload {
    /// Wraps a result in a current-version envelope.
    pub fn new(result: TaskResult) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            result,
        }
    }

    /// Serializes the envelope to a message payload.
    pub fn to_value(&self) -> MeshResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses and version-checks a message payload.
    pub fn parse(value: &serde_json::Value) -> MeshResult<Self> {
        let envelope: Self = serde_json::from_value(value.clone())?;
        check_version("result", envelope.schema_version)?;
        Ok(envelope)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use taskmesh_core::{TaskInput, TaskType};

    #[test]
    fn test_assignment_round_trip() {
        let task = Task::new("task-1-sub-0", TaskType::Analysis, TaskInput::default());
        let value = TaskAssignmentPayload::new(task).to_value().unwrap();
        let parsed = TaskAssignmentPayload::parse(&value).unwrap();
        assert_eq!(parsed.task.id, "task-1-sub-0");
        assert_eq!(parsed.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let task = Task::new("t", TaskType::Analysis, TaskInput::default());
        let mut value = TaskAssignmentPayload::new(task).to_value().unwrap();
        value["schema_version"] = serde_json::json!(99);
        let err = TaskAssignmentPayload::parse(&value).unwrap_err();
        assert!(err.to_string().contains("schema version 99"));
    }

    #[test]
    fn test_missing_version_rejected() {
        let value = serde_json::json!({"task": {"bogus": true}});
        assert!(TaskAssignmentPayload::parse(&value).is_err());
    }

    #[test]
    fn test_result_round_trip() {
        let result = taskmesh_core::TaskResult::success(
            "task-1-sub-0",
            "analysis-worker-1",
            serde_json::json!({"summary": "ok"}),
            42,
        );
        let value = TaskResultPayload::new(result).to_value().unwrap();
        let parsed = TaskResultPayload::parse(&value).unwrap();
        assert!(parsed.result.success);
        assert_eq!(parsed.result.execution_time_ms, 42);
    }
}
