//! Message, scheduler state and delivery wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed id of the singleton scheduler state record.
pub const SCHEDULER_STATE_ID: &str = "scheduler_status";

/// Delivery status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status '{other}'")),
        }
    }
}

/// An outbound short message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Recipient in E.164 form.
    pub to: String,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// Id assigned by the delivery endpoint.
    #[serde(rename = "message_id", default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a new pending message with a fresh id.
    pub fn new(to: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            to: to.to_string(),
            content: content.to_string(),
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            sent_at: None,
            external_id: None,
            retry_count: 0,
            error: None,
            updated_at: None,
        }
    }
}

/// Durable active/inactive flag of the dispatch scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub id: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SchedulerState {
    /// Default inactive record, created lazily on first read.
    pub fn inactive(id: &str) -> Self {
        Self {
            id: id.to_string(),
            is_active: false,
            started_at: None,
            stopped_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.is_active = true;
        self.started_at = Some(at);
        self.updated_at = at;
    }

    pub fn mark_stopped(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.stopped_at = Some(at);
        self.updated_at = at;
    }
}

/// Lifecycle action recorded in the scheduler audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerAction {
    Start,
    Stop,
}

impl SchedulerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerAction::Start => "start",
            SchedulerAction::Stop => "stop",
        }
    }
}

impl std::str::FromStr for SchedulerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(SchedulerAction::Start),
            "stop" => Ok(SchedulerAction::Stop),
            other => Err(format!("unknown scheduler action '{other}'")),
        }
    }
}

/// Immutable audit record of a start or stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerEvent {
    pub id: String,
    pub action: SchedulerAction,
    pub timestamp: DateTime<Utc>,
    /// For stop events: the start event this stop concludes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_id: Option<String>,
}

impl SchedulerEvent {
    pub fn start() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: SchedulerAction::Start,
            timestamp: Utc::now(),
            start_id: None,
        }
    }

    pub fn stop(start_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: SchedulerAction::Stop,
            timestamp: Utc::now(),
            start_id,
        }
    }
}

/// Cache value written after a successful delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Cache key for an external delivery id.
    pub fn cache_key(external_id: &str) -> String {
        format!("message_sent:{external_id}")
    }
}

/// Body posted to the delivery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub to: String,
    pub content: String,
}

impl From<&Message> for DeliveryRequest {
    fn from(message: &Message) -> Self {
        Self {
            to: message.to.clone(),
            content: message.content.clone(),
        }
    }
}

/// Acknowledgment returned by the delivery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAck {
    pub message: String,
    pub message_id: String,
}
