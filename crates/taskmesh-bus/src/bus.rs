use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskmesh_core::{AgentMessage, MeshError, MeshResult, MessageType};
use taskmesh_store::SharedStore;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Capacities, intervals, and scoring parameters of the bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum pending messages per mailbox before publishes are rejected.
    pub max_mailbox_size: usize,
    /// Weight of one priority step in mailbox scoring. The score of a
    /// message is `priority_weight * priority - publish_time_seconds`, so
    /// priority dominates and, within one priority, older messages surface
    /// first. Once the publish-time gap between two messages exceeds
    /// `priority_weight` seconds per priority step, a very old low-priority
    /// message outranks a fresh higher-priority one; that inversion is a
    /// known quirk of the scoring formula and is left as is.
    pub priority_weight: f64,
    /// Sleep between mailbox checks in each processing loop.
    pub poll_interval: Duration,
    /// TTL on the per-agent processing lock.
    pub lock_ttl: Duration,
    /// Sleep between response-slot checks while a request waits.
    pub request_poll_interval: Duration,
    /// Timeout for [`MessageBus::request`] when the caller supplies none.
    pub default_request_timeout: Duration,
    /// TTL on response slots written by [`MessageBus::respond`].
    pub response_ttl: Duration,
    /// Interval of the held-lock warning sweep.
    pub sweep_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_mailbox_size: 1000,
            priority_weight: 1000.0,
            poll_interval: Duration::from_millis(100),
            lock_ttl: Duration::from_secs(30),
            request_poll_interval: Duration::from_millis(100),
            default_request_timeout: Duration::from_secs(30),
            response_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// A mailbox consumer. One handler is registered per subscribed agent;
/// the bus guarantees at most one concurrent `handle` call per agent.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one message. Errors are logged by the bus, not retried:
    /// the message is acknowledged either way.
    async fn handle(&self, message: AgentMessage) -> MeshResult<()>;
}

/// One subscribed agent's processing loop.
struct Subscription {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// The shared-store message bus.
///
/// Constructed once and passed by handle to every component; subscriber
/// loops and the sweeper are stopped deterministically by
/// [`MessageBus::unsubscribe`] and [`MessageBus::shutdown`].
pub struct MessageBus {
    store: Arc<dyn SharedStore>,
    config: BusConfig,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    sweeper: RwLock<Option<Subscription>>,
}

fn mailbox_key(agent_id: &str) -> String {
    format!("bus:mailbox:{agent_id}")
}

fn lock_key(agent_id: &str) -> String {
    format!("bus:lock:{agent_id}")
}

fn response_key(correlation_id: &str) -> String {
    format!("bus:response:{correlation_id}")
}

/// Whether a message's TTL has elapsed.
fn is_expired(message: &AgentMessage) -> bool {
    match message.ttl_seconds {
        Some(ttl) => {
            let age = Utc::now()
                .signed_duration_since(message.timestamp)
                .num_seconds();
            age >= 0 && age as u64 > ttl
        }
        None => false,
    }
}

impl MessageBus {
    /// Creates a bus over `store` with default configuration.
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self::with_config(store, BusConfig::default())
    }

    /// Creates a bus with explicit configuration.
    pub fn with_config(store: Arc<dyn SharedStore>, config: BusConfig) -> Self {
        Self {
            store,
            config,
            subscriptions: RwLock::new(HashMap::new()),
            sweeper: RwLock::new(None),
        }
    }

    /// The bus configuration.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    fn score(&self, message: &AgentMessage) -> f64 {
        let publish_secs = message.timestamp.timestamp_millis() as f64 / 1000.0;
        self.config.priority_weight * f64::from(message.priority.weight()) - publish_secs
    }

    /// Publishes a message.
    ///
    /// Addressed messages go into the receiver's mailbox and are rejected
    /// with [`MeshError::MailboxFull`] if it is at capacity (the mailbox is
    /// not mutated in that case). Messages without a receiver fan out as
    /// one copy per currently-subscribed recipient, excluding the sender;
    /// per-recipient failures of a broadcast are logged, not raised.
    pub async fn publish(&self, message: AgentMessage) -> MeshResult<()> {
        match message.receiver_id.clone() {
            Some(receiver) => self.publish_to(&receiver, message).await,
            None => {
                let recipients: Vec<String> = {
                    let subscriptions = self.subscriptions.read().await;
                    subscriptions
                        .keys()
                        .filter(|id| **id != message.sender_id)
                        .cloned()
                        .collect()
                };
                for recipient in recipients {
                    let mut copy = message.clone();
                    copy.id = Uuid::new_v4();
                    copy.receiver_id = Some(recipient.clone());
                    if let Err(e) = self.publish_to(&recipient, copy).await {
                        warn!(recipient = %recipient, error = %e, "Broadcast copy rejected");
                    }
                }
                Ok(())
            }
        }
    }

    async fn publish_to(&self, receiver: &str, message: AgentMessage) -> MeshResult<()> {
        let key = mailbox_key(receiver);
        let pending = self.store.zcard(&key).await?;
        if pending >= self.config.max_mailbox_size {
            return Err(MeshError::MailboxFull {
                agent_id: receiver.to_string(),
                capacity: self.config.max_mailbox_size,
            });
        }
        let score = self.score(&message);
        let member = serde_json::to_string(&message)?;
        self.store.zadd(&key, &member, score).await
    }

    /// Registers `handler` for `agent_id` and starts its processing loop.
    ///
    /// The loop takes the agent's processing lock, reads the single
    /// best-scored message, invokes the handler, acknowledges the message
    /// unconditionally once the handler returns, releases the lock, and
    /// sleeps. Subscribing an already-subscribed agent replaces its
    /// handler (the previous loop is stopped).
    pub async fn subscribe(&self, agent_id: &str, handler: Arc<dyn MessageHandler>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let agent = agent_id.to_string();

        let handle = tokio::spawn(async move {
            let mailbox = mailbox_key(&agent);
            let lock = lock_key(&agent);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }

                let acquired = match store.set_nx(&lock, "held", Some(config.lock_ttl)).await {
                    Ok(acquired) => acquired,
                    Err(e) => {
                        warn!(agent = %agent, error = %e, "Failed to check processing lock");
                        continue;
                    }
                };
                if !acquired {
                    continue;
                }

                if let Err(e) = Self::process_one(store.as_ref(), &mailbox, &agent, &*handler).await
                {
                    warn!(agent = %agent, error = %e, "Mailbox processing failed");
                }

                if let Err(e) = store.delete(&lock).await {
                    warn!(agent = %agent, error = %e, "Failed to release processing lock");
                }
            }
            debug!(agent = %agent, "Processing loop stopped");
        });

        let mut subscriptions = self.subscriptions.write().await;
        if let Some(previous) = subscriptions.insert(
            agent_id.to_string(),
            Subscription {
                shutdown: shutdown_tx,
                handle,
            },
        ) {
            let _ = previous.shutdown.send(true);
            previous.handle.abort();
        }
    }

    /// Reads and handles at most one message from `mailbox`.
    async fn process_one(
        store: &dyn SharedStore,
        mailbox: &str,
        agent: &str,
        handler: &dyn MessageHandler,
    ) -> MeshResult<()> {
        let top = store.zrange_top(mailbox, 1).await?;
        let Some((member, _score)) = top.into_iter().next() else {
            return Ok(());
        };

        match serde_json::from_str::<AgentMessage>(&member) {
            Ok(message) if is_expired(&message) => {
                debug!(agent = %agent, message_id = %message.id, "Dropping expired message");
            }
            Ok(message) => {
                let message_id = message.id;
                if let Err(e) = handler.handle(message).await {
                    // The bus does not retry: acknowledgment below is
                    // unconditional once the handler has returned.
                    warn!(agent = %agent, message_id = %message_id, error = %e, "Handler failed");
                }
            }
            Err(e) => {
                warn!(agent = %agent, error = %e, "Unparseable mailbox entry, discarding");
            }
        }

        store.zrem(mailbox, &member).await?;
        Ok(())
    }

    /// Stops the processing loop for `agent_id`. New mailbox checks stop;
    /// an in-flight handler call is allowed to finish.
    pub async fn unsubscribe(&self, agent_id: &str) {
        let subscription = {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions.remove(agent_id)
        };
        if let Some(subscription) = subscription {
            let _ = subscription.shutdown.send(true);
        }
    }

    /// Ids of all currently-subscribed agents.
    pub async fn subscribed_agents(&self) -> Vec<String> {
        let subscriptions = self.subscriptions.read().await;
        let mut ids: Vec<String> = subscriptions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sends a request to `target_id` and waits for the correlated
    /// response, polling the response slot until `timeout` (the configured
    /// default when `None`) elapses.
    pub async fn request(
        &self,
        target_id: &str,
        payload: serde_json::Value,
        sender_id: &str,
        timeout: Option<Duration>,
    ) -> MeshResult<serde_json::Value> {
        let timeout = timeout.unwrap_or(self.config.default_request_timeout);
        let correlation_id = Uuid::new_v4().to_string();

        let message = AgentMessage::new(MessageType::Request, sender_id, target_id, payload)
            .with_correlation_id(&correlation_id);
        self.publish(message).await?;

        let slot = response_key(&correlation_id);
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(raw) = self.store.get(&slot).await? {
                self.store.delete(&slot).await?;
                return Ok(serde_json::from_str(&raw)?);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MeshError::RequestTimeout {
                    correlation_id,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            let remaining = deadline - now;
            tokio::time::sleep(self.config.request_poll_interval.min(remaining)).await;
        }
    }

    /// Responds to `original`: fills the correlation slot the requester is
    /// polling and publishes the `Response` message to the requester's
    /// mailbox.
    pub async fn respond(
        &self,
        original: &AgentMessage,
        payload: serde_json::Value,
        sender_id: &str,
    ) -> MeshResult<()> {
        let correlation_id = original.correlation_id.clone().ok_or_else(|| {
            MeshError::Bus(format!(
                "message {} has no correlation id to respond to",
                original.id
            ))
        })?;

        let raw = serde_json::to_string(&payload)?;
        self.store
            .set(
                &response_key(&correlation_id),
                &raw,
                Some(self.config.response_ttl),
            )
            .await?;

        let response = AgentMessage::new(
            MessageType::Response,
            sender_id,
            original.sender_id.clone(),
            payload,
        )
        .with_correlation_id(correlation_id);
        self.publish(response).await
    }

    /// Pending message count for one agent's mailbox.
    pub async fn pending_count(&self, agent_id: &str) -> MeshResult<usize> {
        self.store.zcard(&mailbox_key(agent_id)).await
    }

    /// Total pending messages across all mailboxes.
    pub async fn total_pending(&self) -> MeshResult<usize> {
        let keys = self.store.scan("bus:mailbox:*").await?;
        let mut total = 0;
        for key in keys {
            total += self.store.zcard(&key).await?;
        }
        Ok(total)
    }

    /// Starts the held-lock warning sweep: every `sweep_interval`, any
    /// agent whose processing lock is held gets a warning logged. The
    /// sweep never breaks a lock.
    pub async fn start_sweeper(&self) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let interval = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                match store.scan("bus:lock:*").await {
                    Ok(keys) => {
                        for key in keys {
                            warn!(
                                lock = %key,
                                "Processing lock held through sweep; possible deadlock"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "Lock sweep failed"),
                }
            }
        });

        let mut sweeper = self.sweeper.write().await;
        if let Some(previous) = sweeper.replace(Subscription {
            shutdown: shutdown_tx,
            handle,
        }) {
            let _ = previous.shutdown.send(true);
        }
    }

    /// Stops every processing loop and the sweeper.
    pub async fn shutdown(&self) {
        let subscriptions = {
            let mut subscriptions = self.subscriptions.write().await;
            std::mem::take(&mut *subscriptions)
        };
        for (_, subscription) in subscriptions {
            let _ = subscription.shutdown.send(true);
        }
        let sweeper = {
            let mut sweeper = self.sweeper.write().await;
            sweeper.take()
        };
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown.send(true);
        }
    }
}
