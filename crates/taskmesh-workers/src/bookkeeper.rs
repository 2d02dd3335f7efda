use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use taskmesh_core::{AgentInfo, AgentStatus, MeshResult};
use taskmesh_store::{set_json, SharedStore};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

/// Heartbeat cadence and registry TTL.
#[derive(Debug, Clone)]
pub struct BookkeeperConfig {
    /// How often the registration record is refreshed.
    pub heartbeat_interval: Duration,
    /// TTL on the registration record. When heartbeats stop, expiry is the
    /// implicit deregistration; there is no explicit destroy step.
    pub heartbeat_ttl: Duration,
}

impl Default for BookkeeperConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_ttl: Duration::from_secs(90),
        }
    }
}

/// Registry key of an agent's heartbeat record.
pub fn agent_key(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

struct HeartbeatTask {
    shutdown: watch::Sender<bool>,
}

/// Shared bookkeeping for any agent: registration, periodic heartbeats,
/// and the in-flight/completed/failed counters.
///
/// Composed into each worker (and the leader) instead of being inherited.
/// The in-memory counters and the persisted heartbeat snapshot may
/// transiently disagree; the store copy is whatever the last persist saw.
pub struct AgentBookkeeper {
    store: Arc<dyn SharedStore>,
    config: BookkeeperConfig,
    info: Arc<RwLock<AgentInfo>>,
    heartbeat_task: RwLock<Option<HeartbeatTask>>,
}

impl AgentBookkeeper {
    /// Creates a bookkeeper for `info` with default cadence.
    pub fn new(store: Arc<dyn SharedStore>, info: AgentInfo) -> Self {
        Self::with_config(store, info, BookkeeperConfig::default())
    }

    /// Creates a bookkeeper with explicit cadence.
    pub fn with_config(
        store: Arc<dyn SharedStore>,
        info: AgentInfo,
        config: BookkeeperConfig,
    ) -> Self {
        Self {
            store,
            config,
            info: Arc::new(RwLock::new(info)),
            heartbeat_task: RwLock::new(None),
        }
    }

    /// The agent id this bookkeeper manages.
    pub async fn agent_id(&self) -> String {
        self.info.read().await.id.clone()
    }

    /// Writes the current registration record to the shared registry.
    pub async fn register(&self) -> MeshResult<()> {
        let info = {
            let mut info = self.info.write().await;
            info.last_heartbeat = Utc::now();
            info.clone()
        };
        set_json(
            self.store.as_ref(),
            &agent_key(&info.id),
            &info,
            Some(self.config.heartbeat_ttl),
        )
        .await
    }

    /// Refreshes the registration record (status, counters, timestamp).
    pub async fn heartbeat(&self) -> MeshResult<()> {
        self.register().await
    }

    /// Starts the periodic heartbeat refresh.
    pub async fn start_heartbeat(&self) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let info = Arc::clone(&self.info);
        let config = self.config.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(config.heartbeat_interval) => {}
                }
                let snapshot = {
                    let mut info = info.write().await;
                    info.last_heartbeat = Utc::now();
                    info.clone()
                };
                let key = agent_key(&snapshot.id);
                if let Err(e) = set_json(
                    store.as_ref(),
                    &key,
                    &snapshot,
                    Some(config.heartbeat_ttl),
                )
                .await
                {
                    warn!(agent = %snapshot.id, error = %e, "Heartbeat persist failed");
                }
            }
            debug!("Heartbeat loop stopped");
        });

        let mut heartbeat_task = self.heartbeat_task.write().await;
        if let Some(previous) = heartbeat_task.replace(HeartbeatTask {
            shutdown: shutdown_tx,
        }) {
            let _ = previous.shutdown.send(true);
        }
    }

    /// Halts the periodic refresh. The registry record is left to expire
    /// by TTL.
    pub async fn stop_heartbeat(&self) {
        let task = {
            let mut heartbeat_task = self.heartbeat_task.write().await;
            heartbeat_task.take()
        };
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
        }
    }

    /// Records a task entering execution and persists the new state.
    pub async fn task_started(&self) {
        {
            let mut info = self.info.write().await;
            info.current_task_count += 1;
            info.status = AgentStatus::Busy;
        }
        if let Err(e) = self.register().await {
            warn!(error = %e, "Failed to persist task_started state");
        }
    }

    /// Records a task leaving execution and persists the new state.
    pub async fn task_finished(&self, success: bool) {
        {
            let mut info = self.info.write().await;
            info.current_task_count = info.current_task_count.saturating_sub(1);
            if success {
                info.completed_tasks += 1;
            } else {
                info.failed_tasks += 1;
            }
            if info.current_task_count == 0 {
                info.status = AgentStatus::Idle;
            }
        }
        if let Err(e) = self.register().await {
            warn!(error = %e, "Failed to persist task_finished state");
        }
    }

    /// A copy of the current in-memory registration record.
    pub async fn snapshot(&self) -> AgentInfo {
        self.info.read().await.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use taskmesh_core::AgentRole;
    use taskmesh_store::{get_json, MemoryStore};

    fn bookkeeper(store: Arc<MemoryStore>) -> AgentBookkeeper {
        AgentBookkeeper::new(
            store,
            AgentInfo::new("analysis-worker-1", AgentRole::Analysis, 3),
        )
    }

    #[tokio::test]
    async fn test_register_persists_record() {
        let store = Arc::new(MemoryStore::new());
        let bookkeeper = bookkeeper(Arc::clone(&store));
        bookkeeper.register().await.unwrap();

        let stored: Option<AgentInfo> = get_json(store.as_ref(), "agent:analysis-worker-1")
            .await
            .unwrap();
        let stored = stored.unwrap();
        assert_eq!(stored.role, AgentRole::Analysis);
        assert_eq!(stored.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_counters_track_task_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let bookkeeper = bookkeeper(Arc::clone(&store));

        bookkeeper.task_started().await;
        let info = bookkeeper.snapshot().await;
        assert_eq!(info.current_task_count, 1);
        assert_eq!(info.status, AgentStatus::Busy);

        bookkeeper.task_finished(true).await;
        let info = bookkeeper.snapshot().await;
        assert_eq!(info.current_task_count, 0);
        assert_eq!(info.completed_tasks, 1);
        assert_eq!(info.status, AgentStatus::Idle);

        bookkeeper.task_started().await;
        bookkeeper.task_finished(false).await;
        let info = bookkeeper.snapshot().await;
        assert_eq!(info.failed_tasks, 1);
    }

    #[tokio::test]
    async fn test_finish_without_start_saturates() {
        let store = Arc::new(MemoryStore::new());
        let bookkeeper = bookkeeper(Arc::clone(&store));
        bookkeeper.task_finished(true).await;
        let info = bookkeeper.snapshot().await;
        assert_eq!(info.current_task_count, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_loop_refreshes_record() {
        let store = Arc::new(MemoryStore::new());
        let bookkeeper = AgentBookkeeper::with_config(
            store.clone(),
            AgentInfo::new("w", AgentRole::Validation, 1),
            BookkeeperConfig {
                heartbeat_interval: Duration::from_millis(20),
                heartbeat_ttl: Duration::from_secs(5),
            },
        );

        bookkeeper.start_heartbeat().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        bookkeeper.stop_heartbeat().await;

        let stored: Option<AgentInfo> = get_json(store.as_ref(), "agent:w").await.unwrap();
        assert!(stored.is_some());

        // After stop, the record is no longer refreshed; with a short TTL
        // it would expire, which is the implicit deregistration path.
        let before = stored.unwrap().last_heartbeat;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let after: Option<AgentInfo> = get_json(store.as_ref(), "agent:w").await.unwrap();
        assert_eq!(after.unwrap().last_heartbeat, before);
    }
}
