use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use taskmesh_bus::MessageBus;
use taskmesh_core::{AgentInfo, AgentStatus, MeshResult};
use taskmesh_store::{get_json, set_json, SharedStore};
use tokio::sync::RwLock;
use tracing::debug;

/// Monitor cadence, caps, and the heartbeat staleness boundary.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// A heartbeat older than this marks the agent unhealthy. The
    /// boundary is inclusive: an age of exactly the timeout is healthy.
    pub heartbeat_timeout: Duration,
    /// Rolling metrics history length.
    pub history_cap: usize,
    /// Per-agent audit log length.
    pub log_cap: usize,
    /// TTL on persisted metrics and health snapshots.
    pub snapshot_ttl: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            history_cap: 100,
            log_cap: 100,
            snapshot_ttl: Duration::from_secs(300),
        }
    }
}

/// One system-wide metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMetrics {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Registered agents at snapshot time.
    pub total_agents: usize,
    /// Agents by self-reported status.
    pub idle_agents: usize,
    /// See `idle_agents`.
    pub busy_agents: usize,
    /// See `idle_agents`.
    pub error_agents: usize,
    /// See `idle_agents`.
    pub offline_agents: usize,
    /// Sum of self-reported completed-task counters.
    pub total_completed: u64,
    /// Sum of self-reported failed-task counters.
    pub total_failed: u64,
    /// Total pending messages across all mailboxes.
    pub pending_messages: usize,
}

/// Per-agent health verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    /// The agent this record describes.
    pub agent_id: String,
    /// Whether the heartbeat is fresh enough.
    pub healthy: bool,
    /// Heartbeat age at check time, in seconds.
    pub heartbeat_age_secs: i64,
    /// `failed / (failed + completed)`, 0 when the agent has no traffic.
    pub error_rate: f64,
    /// The agent's self-reported status.
    pub status: AgentStatus,
}

/// One per-agent audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLogEntry {
    /// When the event was logged.
    pub timestamp: DateTime<Utc>,
    /// Event description.
    pub event: String,
}

/// Aggregates self-reported heartbeats into system metrics and per-agent
/// health, and keeps a capped per-agent audit log.
///
/// Heartbeats are unauthenticated self-reports: whatever counters an
/// agent persists are tallied as-is.
pub struct TeamMonitor {
    store: Arc<dyn SharedStore>,
    bus: Arc<MessageBus>,
    config: MonitorConfig,
    history: RwLock<VecDeque<TeamMetrics>>,
}

fn agent_log_key(agent_id: &str) -> String {
    format!("agent-log:{agent_id}")
}

impl TeamMonitor {
    /// Creates a monitor with default configuration.
    pub fn new(store: Arc<dyn SharedStore>, bus: Arc<MessageBus>) -> Self {
        Self::with_config(store, bus, MonitorConfig::default())
    }

    /// Creates a monitor with explicit configuration.
    pub fn with_config(
        store: Arc<dyn SharedStore>,
        bus: Arc<MessageBus>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// All live heartbeat records.
    pub async fn agents(&self) -> MeshResult<Vec<AgentInfo>> {
        let keys = self.store.scan("agent:*").await?;
        let mut agents = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(info) = get_json::<AgentInfo>(self.store.as_ref(), &key).await? {
                agents.push(info);
            }
        }
        Ok(agents)
    }

    /// Scans all heartbeats, tallies counts by status and cumulative
    /// counters, measures total mailbox depth, appends to the rolling
    /// history, and persists the latest snapshot with a short TTL.
    pub async fn collect_metrics(&self) -> MeshResult<TeamMetrics> {
        let agents = self.agents().await?;

        let mut metrics = TeamMetrics {
            timestamp: Utc::now(),
            total_agents: agents.len(),
            idle_agents: 0,
            busy_agents: 0,
            error_agents: 0,
            offline_agents: 0,
            total_completed: 0,
            total_failed: 0,
            pending_messages: self.bus.total_pending().await?,
        };

        for agent in &agents {
            match agent.status {
                AgentStatus::Idle => metrics.idle_agents += 1,
                AgentStatus::Busy => metrics.busy_agents += 1,
                AgentStatus::Error => metrics.error_agents += 1,
                AgentStatus::Offline => metrics.offline_agents += 1,
            }
            metrics.total_completed += agent.completed_tasks;
            metrics.total_failed += agent.failed_tasks;
        }

        {
            let mut history = self.history.write().await;
            history.push_back(metrics.clone());
            while history.len() > self.config.history_cap {
                history.pop_front();
            }
        }

        set_json(
            self.store.as_ref(),
            "metrics:latest",
            &metrics,
            Some(self.config.snapshot_ttl),
        )
        .await?;

        debug!(
            agents = metrics.total_agents,
            pending = metrics.pending_messages,
            "Metrics collected"
        );
        Ok(metrics)
    }

    /// The rolling metrics history, oldest first.
    pub async fn history(&self) -> Vec<TeamMetrics> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Health verdict for one heartbeat record at `now`.
    ///
    /// Healthy iff the heartbeat age does not exceed the timeout: an age
    /// of exactly the timeout is still healthy.
    pub fn evaluate_health(&self, info: &AgentInfo, now: DateTime<Utc>) -> AgentHealth {
        let age_secs = now.signed_duration_since(info.last_heartbeat).num_seconds();
        let healthy = age_secs <= self.config.heartbeat_timeout.as_secs() as i64;

        let attempts = info.completed_tasks + info.failed_tasks;
        let error_rate = if attempts == 0 {
            0.0
        } else {
            info.failed_tasks as f64 / attempts as f64
        };

        AgentHealth {
            agent_id: info.id.clone(),
            healthy,
            heartbeat_age_secs: age_secs,
            error_rate,
            status: info.status,
        }
    }

    /// Computes and persists a health record for every registered agent.
    pub async fn perform_health_checks(&self) -> MeshResult<Vec<AgentHealth>> {
        let agents = self.agents().await?;
        let now = Utc::now();
        let mut checks = Vec::with_capacity(agents.len());

        for agent in &agents {
            let health = self.evaluate_health(agent, now);
            set_json(
                self.store.as_ref(),
                &format!("health:{}", agent.id),
                &health,
                Some(self.config.snapshot_ttl),
            )
            .await?;
            checks.push(health);
        }
        Ok(checks)
    }

    /// Appends an event to the agent's capped audit log.
    pub async fn log_agent_event(&self, agent_id: &str, event: impl Into<String>) -> MeshResult<()> {
        let entry = AgentLogEntry {
            timestamp: Utc::now(),
            event: event.into(),
        };
        let key = agent_log_key(agent_id);
        self.store
            .rpush(&key, &serde_json::to_string(&entry)?)
            .await?;
        self.store
            .ltrim(&key, -(self.config.log_cap as i64), -1)
            .await
    }

    /// The agent's audit log, oldest first.
    pub async fn get_agent_logs(&self, agent_id: &str) -> MeshResult<Vec<AgentLogEntry>> {
        let raw = self.store.lrange(&agent_log_key(agent_id), 0, -1).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for line in raw {
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use taskmesh_core::{AgentMessage, AgentRole, MessageType};
    use taskmesh_store::MemoryStore;

    fn monitor_over(store: Arc<MemoryStore>) -> TeamMonitor {
        let bus = Arc::new(MessageBus::new(Arc::clone(&store) as Arc<dyn SharedStore>));
        TeamMonitor::new(store, bus)
    }

    async fn seed_agent(
        store: &MemoryStore,
        id: &str,
        status: AgentStatus,
        completed: u64,
        failed: u64,
    ) {
        let mut info = AgentInfo::new(id, AgentRole::Analysis, 3);
        info.status = status;
        info.completed_tasks = completed;
        info.failed_tasks = failed;
        set_json(store, &format!("agent:{id}"), &info, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_collect_metrics_tallies_statuses_and_counters() {
        let store = Arc::new(MemoryStore::new());
        seed_agent(&store, "a", AgentStatus::Idle, 10, 2).await;
        seed_agent(&store, "b", AgentStatus::Busy, 5, 0).await;
        seed_agent(&store, "c", AgentStatus::Error, 0, 7).await;

        let monitor = monitor_over(Arc::clone(&store));
        let metrics = monitor.collect_metrics().await.unwrap();

        assert_eq!(metrics.total_agents, 3);
        assert_eq!(metrics.idle_agents, 1);
        assert_eq!(metrics.busy_agents, 1);
        assert_eq!(metrics.error_agents, 1);
        assert_eq!(metrics.total_completed, 15);
        assert_eq!(metrics.total_failed, 9);

        // The latest snapshot is persisted for external readers.
        let stored: Option<TeamMetrics> = get_json(store.as_ref(), "metrics:latest").await.unwrap();
        assert_eq!(stored.unwrap().total_agents, 3);
    }

    #[tokio::test]
    async fn test_metrics_count_pending_messages() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MessageBus::new(Arc::clone(&store) as Arc<dyn SharedStore>));
        bus.publish(AgentMessage::new(
            MessageType::StatusUpdate,
            "x",
            "a",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

        let monitor = TeamMonitor::new(Arc::clone(&store) as Arc<dyn SharedStore>, bus);
        let metrics = monitor.collect_metrics().await.unwrap();
        assert_eq!(metrics.pending_messages, 1);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MessageBus::new(Arc::clone(&store) as Arc<dyn SharedStore>));
        let monitor = TeamMonitor::with_config(
            Arc::clone(&store) as Arc<dyn SharedStore>,
            bus,
            MonitorConfig {
                history_cap: 3,
                ..MonitorConfig::default()
            },
        );

        for _ in 0..5 {
            monitor.collect_metrics().await.unwrap();
        }
        assert_eq!(monitor.history().await.len(), 3);
    }

    #[tokio::test]
    async fn test_health_boundary_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor_over(Arc::clone(&store));
        let now = Utc::now();

        let mut info = AgentInfo::new("a", AgentRole::Analysis, 3);

        // Exactly at the timeout: healthy.
        info.last_heartbeat = now - chrono::Duration::seconds(60);
        assert!(monitor.evaluate_health(&info, now).healthy);

        // One second past: unhealthy.
        info.last_heartbeat = now - chrono::Duration::seconds(61);
        let health = monitor.evaluate_health(&info, now);
        assert!(!health.healthy);
        assert_eq!(health.heartbeat_age_secs, 61);
    }

    #[tokio::test]
    async fn test_error_rate_computation() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor_over(Arc::clone(&store));
        let now = Utc::now();

        let mut info = AgentInfo::new("a", AgentRole::Analysis, 3);
        assert_eq!(monitor.evaluate_health(&info, now).error_rate, 0.0);

        info.completed_tasks = 3;
        info.failed_tasks = 1;
        assert_eq!(monitor.evaluate_health(&info, now).error_rate, 0.25);
    }

    #[tokio::test]
    async fn test_health_checks_persist_records() {
        let store = Arc::new(MemoryStore::new());
        seed_agent(&store, "a", AgentStatus::Idle, 1, 0).await;
        let monitor = monitor_over(Arc::clone(&store));

        let checks = monitor.perform_health_checks().await.unwrap();
        assert_eq!(checks.len(), 1);
        assert!(checks[0].healthy);

        let stored: Option<AgentHealth> = get_json(store.as_ref(), "health:a").await.unwrap();
        assert!(stored.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_agent_log_append_and_trim() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MessageBus::new(Arc::clone(&store) as Arc<dyn SharedStore>));
        let monitor = TeamMonitor::with_config(
            Arc::clone(&store) as Arc<dyn SharedStore>,
            bus,
            MonitorConfig {
                log_cap: 3,
                ..MonitorConfig::default()
            },
        );

        for i in 0..5 {
            monitor
                .log_agent_event("worker-1", format!("event {i}"))
                .await
                .unwrap();
        }

        let logs = monitor.get_agent_logs("worker-1").await.unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].event, "event 2");
        assert_eq!(logs[2].event, "event 4");
    }

    #[tokio::test]
    async fn test_spoofed_counters_are_tallied_as_reported() {
        // Heartbeats are an unauthenticated trust boundary: a worker can
        // claim arbitrary counters and the monitor takes them at face
        // value.
        let store = Arc::new(MemoryStore::new());
        seed_agent(&store, "honest", AgentStatus::Idle, 2, 0).await;
        seed_agent(&store, "liar", AgentStatus::Idle, 1_000_000, 0).await;

        let monitor = monitor_over(Arc::clone(&store));
        let metrics = monitor.collect_metrics().await.unwrap();
        assert_eq!(metrics.total_completed, 1_000_002);
    }
}
