use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of an [`AgentMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// The leader hands a subtask to a worker.
    TaskAssignment,
    /// A worker reports a finished subtask back to the assigner.
    TaskResult,
    /// One half of a request/response exchange.
    Request,
    /// The other half; carries the request's correlation id.
    Response,
    /// Unsolicited status information.
    StatusUpdate,
    /// A copy of a fan-out message (receiver was absent on publish).
    Broadcast,
    /// An error notification.
    Error,
}

/// Delivery priority of a message within one mailbox.
/// Orders `Low < Normal < High < Urgent`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    /// Deliver when nothing else is pending.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Ahead of normal traffic.
    High,
    /// Ahead of everything.
    Urgent,
}

impl MessagePriority {
    /// Numeric weight used in mailbox scoring.
    pub fn weight(&self) -> u8 {
        match self {
            MessagePriority::Low => 1,
            MessagePriority::Normal => 2,
            MessagePriority::High => 3,
            MessagePriority::Urgent => 4,
        }
    }
}

/// A message exchanged over the bus.
///
/// Consumed and removed by exactly the one processing loop reading the
/// recipient's mailbox; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message id.
    pub id: Uuid,
    /// The message kind.
    pub message_type: MessageType,
    /// Delivery priority within the receiver's mailbox.
    pub priority: MessagePriority,
    /// Id of the sending agent.
    pub sender_id: String,
    /// Id of the receiving agent. `None` means broadcast: the bus fans the
    /// message out as one copy per currently-subscribed recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    /// Message payload.
    pub payload: serde_json::Value,
    /// Token pairing a request with its eventual response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Creation time; also the age reference for mailbox scoring.
    pub timestamp: DateTime<Utc>,
    /// Optional time-to-live in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl AgentMessage {
    /// Creates a message addressed to `receiver_id`.
    pub fn new(
        message_type: MessageType,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            priority: MessagePriority::default(),
            sender_id: sender_id.into(),
            receiver_id: Some(receiver_id.into()),
            payload,
            correlation_id: None,
            timestamp: Utc::now(),
            ttl_seconds: None,
        }
    }

    /// Creates a broadcast message (no receiver).
    pub fn broadcast(
        message_type: MessageType,
        sender_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            priority: MessagePriority::default(),
            sender_id: sender_id.into(),
            receiver_id: None,
            payload,
            correlation_id: None,
            timestamp: Utc::now(),
            ttl_seconds: None,
        }
    }

    /// Sets the delivery priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the time-to-live.
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }
}
