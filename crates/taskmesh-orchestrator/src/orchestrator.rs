use crate::keys::{result_key, task_key};
use crate::leader::{Leader, LeaderState};
use crate::monitor::{AgentHealth, TeamMetrics, TeamMonitor};
use crate::payload::{TaskAssignmentPayload, TaskResultPayload};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskmesh_bus::{MessageBus, MessageHandler};
use taskmesh_core::{
    AgentInfo, AgentMessage, MeshError, MeshResult, MessageType, Task, TaskOutput, TaskPriority,
    TaskResult, TaskStatus, TaskType,
};
use taskmesh_store::{get_json, set_json, SharedStore};
use taskmesh_workers::Worker;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Ledger TTLs of the lifecycle API.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// TTL on task records.
    pub task_ttl: Duration,
    /// TTL on result-ledger entries written by worker handlers and for
    /// aggregates.
    pub result_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_ttl: Duration::from_secs(6 * 60 * 60),
            result_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// External snapshot of the whole team.
#[derive(Debug, Clone, Serialize)]
pub struct TeamStatus {
    /// The leader's execution state.
    pub leader_state: LeaderState,
    /// Fresh system-wide metrics.
    pub metrics: TeamMetrics,
    /// Every live registration record.
    pub agents: Vec<AgentInfo>,
}

/// External health summary.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// True when the leader is not in its error state and every
    /// registered agent has a fresh heartbeat.
    pub healthy: bool,
    /// The leader's execution state.
    pub leader_state: LeaderState,
    /// Per-agent verdicts.
    pub agents: Vec<AgentHealth>,
}

/// Mailbox consumer wired in front of one registered worker: executes
/// assignments, writes the result ledger entry, and reports the result
/// back to the assigner.
struct WorkerMailboxHandler {
    worker: Arc<dyn Worker>,
    store: Arc<dyn SharedStore>,
    bus: Arc<MessageBus>,
    agent_id: String,
    result_ttl: Duration,
}

#[async_trait::async_trait]
impl MessageHandler for WorkerMailboxHandler {
    async fn handle(&self, message: AgentMessage) -> MeshResult<()> {
        match message.message_type {
            MessageType::TaskAssignment => {
                let envelope = TaskAssignmentPayload::parse(&message.payload)?;
                debug!(
                    agent = %self.agent_id,
                    task_id = %envelope.task.id,
                    "Executing assignment"
                );

                let result = self.worker.execute(&envelope.task).await;
                set_json(
                    self.store.as_ref(),
                    &result_key(&result.task_id),
                    &result,
                    Some(self.result_ttl),
                )
                .await?;

                let reply = TaskResultPayload::new(result).to_value()?;
                let response = AgentMessage::new(
                    MessageType::TaskResult,
                    &self.agent_id,
                    &message.sender_id,
                    reply,
                );
                if let Err(e) = self.bus.publish(response).await {
                    warn!(agent = %self.agent_id, error = %e, "Result report rejected");
                }
                Ok(())
            }
            other => {
                debug!(agent = %self.agent_id, message_type = ?other, "Ignoring message");
                Ok(())
            }
        }
    }
}

/// The task lifecycle API: submit, execute, query, cancel, and the
/// worker/bus wiring done at startup.
pub struct Orchestrator {
    store: Arc<dyn SharedStore>,
    bus: Arc<MessageBus>,
    leader: Arc<Leader>,
    monitor: Arc<TeamMonitor>,
    config: OrchestratorConfig,
    sequence: AtomicU64,
    workers: RwLock<HashMap<String, Arc<dyn Worker>>>,
}

impl Orchestrator {
    /// Creates an orchestrator with default TTLs.
    pub fn new(
        store: Arc<dyn SharedStore>,
        bus: Arc<MessageBus>,
        leader: Arc<Leader>,
        monitor: Arc<TeamMonitor>,
    ) -> Self {
        Self::with_config(store, bus, leader, monitor, OrchestratorConfig::default())
    }

    /// Creates an orchestrator with explicit TTLs.
    pub fn with_config(
        store: Arc<dyn SharedStore>,
        bus: Arc<MessageBus>,
        leader: Arc<Leader>,
        monitor: Arc<TeamMonitor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            bus,
            leader,
            monitor,
            config,
            sequence: AtomicU64::new(0),
            workers: RwLock::new(HashMap::new()),
        }
    }

    // --- Task lifecycle ---

    /// Creates a pending task record in the shared ledger and returns it.
    pub async fn submit_task(
        &self,
        task_type: TaskType,
        data: serde_json::Value,
        priority: TaskPriority,
        metadata: HashMap<String, serde_json::Value>,
    ) -> MeshResult<Task> {
        let id = format!("task-{:06}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        let task = Task::new(&id, task_type, taskmesh_core::TaskInput::new(data))
            .with_priority(priority)
            .with_metadata(metadata);

        set_json(
            self.store.as_ref(),
            &task_key(&id),
            &task,
            Some(self.config.task_ttl),
        )
        .await?;

        info!(task_id = %id, task_type = %task.task_type, "Task submitted");
        Ok(task)
    }

    /// Executes a submitted task through the leader.
    ///
    /// Always resolves to a well-formed [`TaskResult`] for an existing
    /// task: any error escaping the execution path is caught, recorded as
    /// a failed task, and returned as a failed result. Only an unknown
    /// `task_id` is an error.
    pub async fn execute_task(&self, task_id: &str) -> MeshResult<TaskResult> {
        let Some(mut task) = get_json::<Task>(self.store.as_ref(), &task_key(task_id)).await?
        else {
            return Err(MeshError::Orchestrator(format!("task {task_id} not found")));
        };

        match self.execute_inner(&mut task).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(task_id, error = %e, "Execution failed outside the leader");
                let failure =
                    TaskResult::failure(task_id, self.leader.id(), e.to_string(), 0);
                if let Err(persist_err) = self.record_failure(&mut task, &failure).await {
                    warn!(task_id, error = %persist_err, "Failed to record failure");
                }
                Ok(failure)
            }
        }
    }

    async fn execute_inner(&self, task: &mut Task) -> MeshResult<TaskResult> {
        task.transition(TaskStatus::InProgress)?;
        set_json(
            self.store.as_ref(),
            &task_key(&task.id),
            task,
            Some(self.config.task_ttl),
        )
        .await?;

        let result = self.leader.run(task).await;

        set_json(
            self.store.as_ref(),
            &result_key(&task.id),
            &result,
            Some(self.config.result_ttl),
        )
        .await?;

        // Reload before the write-back: a cancel may have landed while the
        // leader was running, and terminal statuses are append-stable.
        let mut current = get_json::<Task>(self.store.as_ref(), &task_key(&task.id))
            .await?
            .unwrap_or_else(|| task.clone());
        if !current.status.is_terminal() {
            current.child_task_ids = task.child_task_ids.clone();
            current.transition(if result.success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            })?;
            current.output = Some(TaskOutput {
                success: result.success,
                data: result.output.clone(),
                error: result.error.clone(),
                metadata: HashMap::new(),
            });
            set_json(
                self.store.as_ref(),
                &task_key(&task.id),
                &current,
                Some(self.config.task_ttl),
            )
            .await?;
            *task = current;
        }

        if let Err(e) = self
            .monitor
            .log_agent_event(
                self.leader.id(),
                format!("task {} finished, success={}", task.id, result.success),
            )
            .await
        {
            warn!(task_id = %task.id, error = %e, "Monitor event not logged");
        }

        Ok(result)
    }

    async fn record_failure(&self, task: &mut Task, failure: &TaskResult) -> MeshResult<()> {
        set_json(
            self.store.as_ref(),
            &result_key(&task.id),
            failure,
            Some(self.config.result_ttl),
        )
        .await?;
        if !task.status.is_terminal() {
            task.transition(TaskStatus::Failed)?;
            task.output = Some(TaskOutput {
                success: false,
                data: None,
                error: failure.error.clone(),
                metadata: HashMap::new(),
            });
        }
        set_json(
            self.store.as_ref(),
            &task_key(&task.id),
            task,
            Some(self.config.task_ttl),
        )
        .await
    }

    /// Cancels a task that has not completed or failed.
    ///
    /// Advisory: an in-flight execution is not interrupted; the leader
    /// finishes its cycle and the cancelled status wins the write-back.
    /// Cancelling an already-cancelled task is a no-op.
    pub async fn cancel_task(&self, task_id: &str) -> MeshResult<Task> {
        let Some(mut task) = get_json::<Task>(self.store.as_ref(), &task_key(task_id)).await?
        else {
            return Err(MeshError::Orchestrator(format!("task {task_id} not found")));
        };

        match task.status {
            TaskStatus::Completed | TaskStatus::Failed => {
                return Err(MeshError::Orchestrator(format!(
                    "task {task_id} is already {:?} and cannot be cancelled",
                    task.status
                )));
            }
            TaskStatus::Cancelled => return Ok(task),
            _ => {}
        }

        task.transition(TaskStatus::Cancelled)?;
        set_json(
            self.store.as_ref(),
            &task_key(task_id),
            &task,
            Some(self.config.task_ttl),
        )
        .await?;
        info!(task_id, "Task cancelled");
        Ok(task)
    }

    /// The full task record, if present.
    pub async fn get_task(&self, task_id: &str) -> MeshResult<Option<Task>> {
        get_json(self.store.as_ref(), &task_key(task_id)).await
    }

    /// The task's lifecycle status, if the task exists.
    pub async fn get_task_status(&self, task_id: &str) -> MeshResult<Option<TaskStatus>> {
        Ok(self.get_task(task_id).await?.map(|t| t.status))
    }

    /// The task's result-ledger entry, if one has been written.
    pub async fn get_task_result(&self, task_id: &str) -> MeshResult<Option<TaskResult>> {
        get_json(self.store.as_ref(), &result_key(task_id)).await
    }

    // --- Worker wiring ---

    /// Initializes a worker (registration + heartbeat) and subscribes it
    /// to its mailbox. Returns the worker's agent id.
    pub async fn register_worker_agent(&self, worker: Arc<dyn Worker>) -> MeshResult<String> {
        worker.initialize().await?;
        let info = worker.info().await;

        let handler = Arc::new(WorkerMailboxHandler {
            worker: Arc::clone(&worker),
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            agent_id: info.id.clone(),
            result_ttl: self.config.result_ttl,
        });
        self.bus.subscribe(&info.id, handler).await;
        self.workers
            .write()
            .await
            .insert(info.id.clone(), worker);

        if let Err(e) = self.monitor.log_agent_event(&info.id, "registered").await {
            warn!(agent = %info.id, error = %e, "Monitor event not logged");
        }
        info!(agent = %info.id, role = %info.role, "Worker registered");
        Ok(info.id)
    }

    /// Unsubscribes the worker's mailbox loop and stops its heartbeat.
    /// The registry record is left to expire by TTL.
    pub async fn unregister_worker_agent(&self, agent_id: &str) -> MeshResult<()> {
        self.bus.unsubscribe(agent_id).await;
        let worker = self.workers.write().await.remove(agent_id);
        if let Some(worker) = worker {
            worker.stop_heartbeat().await;
        }
        if let Err(e) = self.monitor.log_agent_event(agent_id, "unregistered").await {
            warn!(agent = %agent_id, error = %e, "Monitor event not logged");
        }
        info!(agent = %agent_id, "Worker unregistered");
        Ok(())
    }

    // --- External reporting ---

    /// Fresh metrics plus the leader state and registry snapshot.
    pub async fn get_team_status(&self) -> MeshResult<TeamStatus> {
        Ok(TeamStatus {
            leader_state: self.leader.state().await,
            metrics: self.monitor.collect_metrics().await?,
            agents: self.monitor.agents().await?,
        })
    }

    /// Health verdicts for the leader and every registered agent.
    pub async fn health_check(&self) -> MeshResult<HealthReport> {
        let leader_state = self.leader.state().await;
        let agents = self.monitor.perform_health_checks().await?;
        let healthy = leader_state != LeaderState::Error && agents.iter().all(|a| a.healthy);
        Ok(HealthReport {
            healthy,
            leader_state,
            agents,
        })
    }
}
