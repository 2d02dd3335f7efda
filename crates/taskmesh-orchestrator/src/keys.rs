//! Key layout of the shared task and result ledgers.

/// Ledger key of a task record.
pub fn task_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

/// Ledger key of a task's result.
pub fn result_key(task_id: &str) -> String {
    format!("result:{task_id}")
}
