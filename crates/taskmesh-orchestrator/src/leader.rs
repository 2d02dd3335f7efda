use crate::keys::{result_key, task_key};
use crate::payload::TaskAssignmentPayload;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskmesh_bus::MessageBus;
use taskmesh_core::{
    AgentInfo, AgentMessage, AgentRole, AgentStatus, MeshError, MeshResult, MessagePriority,
    MessageType, Task, TaskDecomposition, TaskInput, TaskPriority, TaskResult, TaskStatus,
    TaskType,
};
use taskmesh_llm::{extract_json, CompletionClient, CompletionRequest};
use taskmesh_store::{get_json, set_json, SharedStore};
use taskmesh_workers::AgentBookkeeper;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Leader timing and identity configuration.
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    /// The leader's agent id.
    pub id: String,
    /// Cadence of the result-ledger poll.
    pub result_poll_interval: Duration,
    /// Overall budget for collecting subtask results. Subtasks without a
    /// result when this elapses count as failures at aggregation.
    pub result_timeout: Duration,
    /// TTL on subtask records written to the task ledger.
    pub task_record_ttl: Duration,
    /// Sampling temperature for the planner prompt.
    pub planner_temperature: f32,
    /// Token budget for the planner prompt.
    pub planner_max_tokens: u32,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            id: "leader-1".to_string(),
            result_poll_interval: Duration::from_secs(1),
            result_timeout: Duration::from_secs(60),
            task_record_ttl: Duration::from_secs(6 * 60 * 60),
            planner_temperature: 0.3,
            planner_max_tokens: 2000,
        }
    }
}

/// Execution state of the leader.
///
/// `Error` is entered on an unhandled failure inside a cycle and cleared
/// back to `Idle` only by the next successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderState {
    /// No execution in flight.
    Idle,
    /// An execution cycle is running.
    Busy,
    /// The last cycle failed with an unhandled error.
    Error,
}

/// A named error-recovery strategy, applied by outer callers through
/// [`Leader::handle_error`]; the monitor loop never invokes these itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum RecoveryStrategy {
    /// Re-enqueue the task if its retry count is under `max_attempts`.
    Retry {
        /// Upper bound on total retry attempts.
        max_attempts: u32,
    },
    /// Point the task at a fallback agent and re-enqueue it.
    Reassign {
        /// The agent to receive the task.
        fallback_agent: String,
    },
    /// Log only; no state change.
    Fallback,
    /// Mark the task failed.
    Abort,
}

/// One subtask-to-worker pairing. `agent_id` is `None` when no eligible
/// worker existed at planning time; such subtasks are never retried for
/// assignment within the execution and surface as failures at
/// aggregation.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// The subtask to run.
    pub subtask_id: String,
    /// The chosen worker, if any qualified.
    pub agent_id: Option<String>,
}

/// The full pairing produced for one decomposition.
#[derive(Debug, Clone, Default)]
pub struct AssignmentPlan {
    /// One entry per subtask, in decomposition order.
    pub assignments: Vec<Assignment>,
}

/// Decomposes tasks, assigns subtasks to workers, monitors completion,
/// aggregates results, and applies caller-driven recovery.
pub struct Leader {
    config: LeaderConfig,
    store: Arc<dyn SharedStore>,
    bus: Arc<MessageBus>,
    llm: Arc<CompletionClient>,
    state: RwLock<LeaderState>,
    bookkeeper: AgentBookkeeper,
}

/// Planner reply shapes. Indices are zero-based positions into
/// `subtasks`; ids are synthesized afterwards.
#[derive(Debug, Deserialize)]
struct PlannedSubtask {
    #[serde(rename = "type")]
    task_type: String,
    description: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    dependencies: Vec<usize>,
    worker_type: String,
}

#[derive(Debug, Deserialize)]
struct PlannedDecomposition {
    subtasks: Vec<PlannedSubtask>,
    #[serde(default)]
    execution_order: Option<Vec<usize>>,
}

fn role_for_tag(tag: &str) -> Option<AgentRole> {
    match tag {
        "analysis" => Some(AgentRole::Analysis),
        "generation" => Some(AgentRole::Generation),
        "retrieval" => Some(AgentRole::Retrieval),
        "validation" => Some(AgentRole::Validation),
        _ => None,
    }
}

fn message_priority(priority: TaskPriority) -> MessagePriority {
    match priority {
        TaskPriority::Low => MessagePriority::Low,
        TaskPriority::Medium => MessagePriority::Normal,
        TaskPriority::High => MessagePriority::High,
        TaskPriority::Critical => MessagePriority::Urgent,
    }
}

impl Leader {
    /// Creates a leader over the given collaborators.
    pub fn new(
        store: Arc<dyn SharedStore>,
        bus: Arc<MessageBus>,
        llm: Arc<CompletionClient>,
        config: LeaderConfig,
    ) -> Self {
        let info = AgentInfo::new(config.id.clone(), AgentRole::Leader, 1);
        Self {
            bookkeeper: AgentBookkeeper::new(Arc::clone(&store), info),
            config,
            store,
            bus,
            llm,
            state: RwLock::new(LeaderState::Idle),
        }
    }

    /// The leader's agent id.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// The leader's current execution state.
    pub async fn state(&self) -> LeaderState {
        *self.state.read().await
    }

    /// Registers the leader in the shared registry and starts heartbeats.
    pub async fn initialize(&self) -> MeshResult<()> {
        self.bookkeeper.register().await?;
        self.bookkeeper.start_heartbeat().await;
        Ok(())
    }

    /// Stops the leader's heartbeat on shutdown.
    pub async fn stop_heartbeat(&self) {
        self.bookkeeper.stop_heartbeat().await;
    }

    /// Runs one full execution cycle for `task`: decompose, assign,
    /// monitor, aggregate.
    ///
    /// Always returns a well-formed [`TaskResult`]. An unhandled failure
    /// inside the cycle leaves the leader in [`LeaderState::Error`]; a
    /// later successful cycle clears it.
    pub async fn run(&self, task: &mut Task) -> TaskResult {
        *self.state.write().await = LeaderState::Busy;
        self.bookkeeper.task_started().await;

        let cycle = self.run_cycle(task).await;
        let result = match cycle {
            Ok(result) => {
                *self.state.write().await = LeaderState::Idle;
                result
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Execution cycle failed");
                *self.state.write().await = LeaderState::Error;
                TaskResult::failure(&task.id, &self.config.id, e.to_string(), 0)
            }
        };

        self.bookkeeper.task_finished(result.success).await;
        result
    }

    async fn run_cycle(&self, task: &mut Task) -> MeshResult<TaskResult> {
        let mut decomposition = self.decompose_task(task).await;
        task.child_task_ids = decomposition.subtasks.iter().map(|t| t.id.clone()).collect();

        info!(
            task_id = %task.id,
            subtasks = decomposition.subtasks.len(),
            "Decomposition complete"
        );

        let plan = self.create_assignment_plan(&decomposition).await?;
        self.assign_tasks(&mut decomposition, &plan).await?;
        let results = self.monitor_and_collect(&decomposition).await?;
        Ok(self.aggregate_results(task, &results, &decomposition))
    }

    // --- Decomposition ---

    fn planner_prompt(task: &Task) -> String {
        format!(
            "You lead a team of specialized workers. Their capabilities:\n\
             - analysis: structured extraction and assessment of content\n\
             - generation: template-driven content generation (summary, expansion, rewrite, generic)\n\
             - retrieval: scored lookup of relevant items for a query\n\
             - validation: scoring content against criteria or deterministic checks\n\n\
             Decompose the task below into subtasks. Reply with ONLY a JSON object:\n\
             {{\"subtasks\": [{{\"type\": \"ANALYSIS|GENERATION|RETRIEVAL|VALIDATION\", \
             \"description\": \"...\", \"priority\": \"low|medium|high|critical\", \
             \"dependencies\": [zero-based indices], \
             \"worker_type\": \"analysis|generation|retrieval|validation\"}}], \
             \"execution_order\": [zero-based indices]}}\n\n\
             Task type: {}\nTask payload: {}",
            task.task_type, task.input.data
        )
    }

    /// Decomposes `task` via the planner prompt. Any failure (transport,
    /// parse, or referential) falls back to the fixed two-step plan and
    /// is never surfaced.
    pub async fn decompose_task(&self, task: &Task) -> TaskDecomposition {
        let request = CompletionRequest::new(Self::planner_prompt(task))
            .with_temperature(self.config.planner_temperature)
            .with_max_tokens(self.config.planner_max_tokens);

        let planned = match self.llm.complete(&request).await {
            Ok(response) => Self::parse_plan(task, &response.content),
            Err(e) => Err(e),
        };

        match planned {
            Ok(decomposition) => decomposition,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Planner output unusable, using fallback plan");
                Self::fallback_decomposition(task)
            }
        }
    }

    fn parse_plan(task: &Task, reply: &str) -> MeshResult<TaskDecomposition> {
        let value = extract_json(reply)?;
        let planned: PlannedDecomposition = serde_json::from_value(value)?;
        if planned.subtasks.is_empty() {
            return Err(MeshError::Orchestrator("planner produced no subtasks".to_string()));
        }

        let count = planned.subtasks.len();
        let id_of = |index: usize| format!("{}-sub-{index}", task.id);

        let mut subtasks = Vec::with_capacity(count);
        let mut dependencies = HashMap::new();

        for (index, planned_subtask) in planned.subtasks.iter().enumerate() {
            for dep in &planned_subtask.dependencies {
                if *dep >= count {
                    return Err(MeshError::Orchestrator(format!(
                        "subtask {index} depends on out-of-range index {dep}"
                    )));
                }
            }

            let task_type: TaskType = serde_json::from_value(serde_json::Value::String(
                planned_subtask.task_type.to_uppercase(),
            ))?;
            let priority: TaskPriority = match &planned_subtask.priority {
                Some(p) => serde_json::from_value(serde_json::Value::String(p.to_lowercase()))
                    .unwrap_or_default(),
                None => TaskPriority::default(),
            };

            let input = TaskInput {
                data: serde_json::json!({
                    "description": planned_subtask.description,
                    "source": task.input.data,
                }),
                context: task.input.context.clone(),
            };

            let mut subtask = Task::new(id_of(index), task_type, input)
                .with_priority(priority)
                .with_parent(&task.id);
            subtask.metadata.insert(
                "worker_type".to_string(),
                serde_json::json!(planned_subtask.worker_type),
            );
            subtasks.push(subtask);

            dependencies.insert(
                id_of(index),
                planned_subtask
                    .dependencies
                    .iter()
                    .map(|dep| id_of(*dep))
                    .collect(),
            );
        }

        let execution_order = match planned.execution_order {
            Some(order) => {
                for index in &order {
                    if *index >= count {
                        return Err(MeshError::Orchestrator(format!(
                            "execution order references out-of-range index {index}"
                        )));
                    }
                }
                order.into_iter().map(id_of).collect()
            }
            None => (0..count).map(id_of).collect(),
        };

        Ok(TaskDecomposition {
            task: task.clone(),
            subtasks,
            dependencies,
            execution_order,
        })
    }

    /// The fixed fallback plan: one analysis subtask, then one generation
    /// subtask depending on it.
    fn fallback_decomposition(task: &Task) -> TaskDecomposition {
        let analysis_id = format!("{}-sub-0", task.id);
        let generation_id = format!("{}-sub-1", task.id);

        let mut analysis = Task::new(
            analysis_id.clone(),
            TaskType::Analysis,
            TaskInput {
                data: serde_json::json!({
                    "description": "Analyze the task input",
                    "source": task.input.data,
                }),
                context: task.input.context.clone(),
            },
        )
        .with_parent(&task.id);
        analysis
            .metadata
            .insert("worker_type".to_string(), serde_json::json!("analysis"));

        let mut generation = Task::new(
            generation_id.clone(),
            TaskType::Generation,
            TaskInput {
                data: serde_json::json!({
                    "description": "Generate content from the analysis",
                    "source": task.input.data,
                }),
                context: task.input.context.clone(),
            },
        )
        .with_parent(&task.id);
        generation
            .metadata
            .insert("worker_type".to_string(), serde_json::json!("generation"));

        TaskDecomposition {
            task: task.clone(),
            subtasks: vec![analysis, generation],
            dependencies: HashMap::from([
                (analysis_id.clone(), Vec::new()),
                (generation_id.clone(), vec![analysis_id.clone()]),
            ]),
            execution_order: vec![analysis_id, generation_id],
        }
    }

    // --- Assignment ---

    /// Snapshot of the registry: every live heartbeat record.
    async fn registry_snapshot(&self) -> MeshResult<Vec<AgentInfo>> {
        let keys = self.store.scan("agent:*").await?;
        let mut agents = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(info) = get_json::<AgentInfo>(self.store.as_ref(), &key).await? {
                agents.push(info);
            }
        }
        Ok(agents)
    }

    /// Pairs each subtask with the best currently-idle worker of its
    /// declared worker type: fewest in-flight tasks first, then most
    /// cumulative completions. A subtask with no eligible worker is left
    /// unassigned and only logged; it is not revisited within this
    /// execution. No dependency gating happens here: a subtask is paired
    /// regardless of whether the subtasks it depends on have completed.
    pub async fn create_assignment_plan(
        &self,
        decomposition: &TaskDecomposition,
    ) -> MeshResult<AssignmentPlan> {
        let agents = self.registry_snapshot().await?;
        let mut plan = AssignmentPlan::default();

        for subtask in &decomposition.subtasks {
            let tag = subtask
                .metadata
                .get("worker_type")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let Some(role) = role_for_tag(tag) else {
                warn!(
                    subtask_id = %subtask.id,
                    worker_type = tag,
                    "Unknown worker type, leaving subtask unassigned"
                );
                plan.assignments.push(Assignment {
                    subtask_id: subtask.id.clone(),
                    agent_id: None,
                });
                continue;
            };

            let mut candidates: Vec<&AgentInfo> = agents
                .iter()
                .filter(|a| a.role == role && a.status == AgentStatus::Idle && a.has_capacity())
                .collect();
            candidates.sort_by(|a, b| {
                a.current_task_count
                    .cmp(&b.current_task_count)
                    .then(b.completed_tasks.cmp(&a.completed_tasks))
            });

            let chosen = candidates.first().map(|a| a.id.clone());
            if chosen.is_none() {
                warn!(
                    subtask_id = %subtask.id,
                    role = %role,
                    "No eligible worker for subtask"
                );
            }
            plan.assignments.push(Assignment {
                subtask_id: subtask.id.clone(),
                agent_id: chosen,
            });
        }

        Ok(plan)
    }

    /// Publishes a `TaskAssignment` for every paired subtask and marks it
    /// `Assigned`; persists every subtask record to the task ledger.
    pub async fn assign_tasks(
        &self,
        decomposition: &mut TaskDecomposition,
        plan: &AssignmentPlan,
    ) -> MeshResult<()> {
        for assignment in &plan.assignments {
            let Some(subtask) = decomposition
                .subtasks
                .iter_mut()
                .find(|t| t.id == assignment.subtask_id)
            else {
                continue;
            };

            if let Some(agent_id) = &assignment.agent_id {
                subtask.assigned_agent_id = Some(agent_id.clone());
                subtask.transition(TaskStatus::Assigned)?;

                let payload = TaskAssignmentPayload::new(subtask.clone()).to_value()?;
                let message =
                    AgentMessage::new(MessageType::TaskAssignment, &self.config.id, agent_id, payload)
                        .with_priority(message_priority(subtask.priority));
                self.bus.publish(message).await?;

                debug!(subtask_id = %subtask.id, agent = %agent_id, "Subtask assigned");
            }

            set_json(
                self.store.as_ref(),
                &task_key(&subtask.id),
                subtask,
                Some(self.config.task_record_ttl),
            )
            .await?;
        }
        Ok(())
    }

    // --- Monitoring ---

    /// Polls the result ledger once per poll interval until every subtask
    /// has a result or the timeout elapses, whichever is first. Unassigned
    /// subtasks never produce a result and always drive this to the
    /// timeout path.
    pub async fn monitor_and_collect(
        &self,
        decomposition: &TaskDecomposition,
    ) -> MeshResult<HashMap<String, TaskResult>> {
        let deadline = Instant::now() + self.config.result_timeout;
        let mut results: HashMap<String, TaskResult> = HashMap::new();

        loop {
            for subtask in &decomposition.subtasks {
                if results.contains_key(&subtask.id) {
                    continue;
                }
                if let Some(result) =
                    get_json::<TaskResult>(self.store.as_ref(), &result_key(&subtask.id)).await?
                {
                    debug!(subtask_id = %subtask.id, success = result.success, "Result collected");
                    results.insert(subtask.id.clone(), result);
                }
            }

            if results.len() == decomposition.subtasks.len() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    collected = results.len(),
                    expected = decomposition.subtasks.len(),
                    "Result collection timed out"
                );
                break;
            }
            tokio::time::sleep(self.config.result_poll_interval.min(deadline - now)).await;
        }

        Ok(results)
    }

    // --- Aggregation ---

    /// Merges collected results into one aggregate for the parent task.
    ///
    /// Overall success requires every subtask (not just every collected
    /// result) to have succeeded; `retryable` is true iff any subtask
    /// failed or is missing. Successful outputs are merged keyed by the
    /// subtask's task type, last-write-wins for duplicate types. Execution
    /// time is the sum of the collected subtask times, not wall clock.
    pub fn aggregate_results(
        &self,
        parent: &Task,
        results: &HashMap<String, TaskResult>,
        decomposition: &TaskDecomposition,
    ) -> TaskResult {
        let total = decomposition.subtasks.len();
        let mut merged = serde_json::Map::new();
        let mut failed: Vec<String> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        let mut succeeded = 0usize;

        for subtask in &decomposition.subtasks {
            match results.get(&subtask.id) {
                Some(result) if result.success => {
                    succeeded += 1;
                    merged.insert(
                        subtask.task_type.to_string(),
                        result.output.clone().unwrap_or(serde_json::Value::Null),
                    );
                }
                Some(_) => failed.push(subtask.id.clone()),
                None => missing.push(subtask.id.clone()),
            }
        }

        let success = succeeded == total;
        let execution_time_ms: u64 = results.values().map(|r| r.execution_time_ms).sum();

        let output = serde_json::json!({
            "data": serde_json::Value::Object(merged),
            "subtask_count": total,
            "succeeded": succeeded,
            "failed": failed,
            "missing": missing,
        });

        let error = if success {
            None
        } else {
            Some(format!(
                "{} of {total} subtasks did not succeed (failed: [{}], no result: [{}])",
                total - succeeded,
                failed.join(", "),
                missing.join(", ")
            ))
        };

        TaskResult {
            task_id: parent.id.clone(),
            success,
            output: Some(output),
            execution_time_ms,
            agent_id: self.config.id.clone(),
            error,
            retryable: !success,
        }
    }

    // --- Recovery ---

    /// Applies a named recovery strategy to `task_id`. Invoked by outer
    /// callers; nothing in the monitor loop triggers this automatically.
    pub async fn handle_error(
        &self,
        task_id: &str,
        error: &str,
        strategy: RecoveryStrategy,
    ) -> MeshResult<()> {
        let key = task_key(task_id);
        match strategy {
            RecoveryStrategy::Retry { max_attempts } => {
                let Some(mut task) = get_json::<Task>(self.store.as_ref(), &key).await? else {
                    return Err(MeshError::Orchestrator(format!("task {task_id} not found")));
                };
                if task.retry_count >= max_attempts {
                    warn!(
                        task_id,
                        retry_count = task.retry_count,
                        "Retries exhausted, not re-enqueueing"
                    );
                    return Ok(());
                }
                task.retry_count += 1;
                task.status = TaskStatus::Pending;
                if let Some(agent_id) = task.assigned_agent_id.clone() {
                    self.republish(&task, &agent_id).await?;
                    task.status = TaskStatus::Assigned;
                }
                set_json(
                    self.store.as_ref(),
                    &key,
                    &task,
                    Some(self.config.task_record_ttl),
                )
                .await?;
                info!(task_id, attempt = task.retry_count, "Task re-enqueued");
                Ok(())
            }
            RecoveryStrategy::Reassign { fallback_agent } => {
                let Some(mut task) = get_json::<Task>(self.store.as_ref(), &key).await? else {
                    return Err(MeshError::Orchestrator(format!("task {task_id} not found")));
                };
                task.assigned_agent_id = Some(fallback_agent.clone());
                task.status = TaskStatus::Assigned;
                self.republish(&task, &fallback_agent).await?;
                set_json(
                    self.store.as_ref(),
                    &key,
                    &task,
                    Some(self.config.task_record_ttl),
                )
                .await?;
                info!(task_id, agent = %fallback_agent, "Task reassigned");
                Ok(())
            }
            RecoveryStrategy::Fallback => {
                warn!(task_id, error, "Fallback strategy: logged, no state change");
                Ok(())
            }
            RecoveryStrategy::Abort => {
                let Some(mut task) = get_json::<Task>(self.store.as_ref(), &key).await? else {
                    return Err(MeshError::Orchestrator(format!("task {task_id} not found")));
                };
                task.transition(TaskStatus::Failed)?;
                task.output = Some(taskmesh_core::TaskOutput {
                    success: false,
                    data: None,
                    error: Some(error.to_string()),
                    metadata: HashMap::new(),
                });
                set_json(
                    self.store.as_ref(),
                    &key,
                    &task,
                    Some(self.config.task_record_ttl),
                )
                .await?;
                info!(task_id, "Task aborted");
                Ok(())
            }
        }
    }

    async fn republish(&self, task: &Task, agent_id: &str) -> MeshResult<()> {
        let payload = TaskAssignmentPayload::new(task.clone()).to_value()?;
        let message = AgentMessage::new(MessageType::TaskAssignment, &self.config.id, agent_id, payload)
            .with_priority(message_priority(task.priority));
        self.bus.publish(message).await
    }
}
