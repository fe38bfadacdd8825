//! Collaborator seams consumed by the dispatch scheduler and the gateway.
//!
//! The scheduler never talks to a concrete database; it is handed
//! `Arc<dyn MessageStore>` and friends so storage can be swapped or faked.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Message, MessageStatus, SchedulerEvent, SchedulerState};

/// Query filter over messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub status: Option<MessageStatus>,
    /// Only messages with `retry_count` strictly below this value.
    pub retry_count_below: Option<u32>,
}

impl MessageFilter {
    /// Messages the scheduler may dispatch.
    pub fn dispatchable(max_retry_count: u32) -> Self {
        Self {
            status: Some(MessageStatus::Pending),
            retry_count_below: Some(max_retry_count),
        }
    }

    pub fn with_status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            retry_count_below: None,
        }
    }
}

/// Sort order for message queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSort {
    /// Oldest created first; ties keep the store's natural order.
    CreatedAsc,
    /// Most recently sent first.
    SentDesc,
}

/// Durable message records.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: &Message) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Message>>;

    async fn find(&self, filter: &MessageFilter, sort: MessageSort, limit: usize) -> Result<Vec<Message>>;

    /// On `Sent`, sets `sent_at` and the external id. On `Failed`, increments
    /// `retry_count` by one and records the error text.
    async fn update_status(
        &self,
        id: &str,
        status: MessageStatus,
        external_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<()>;

    async fn count(&self, filter: &MessageFilter) -> Result<u64>;

    async fn find_page(
        &self,
        filter: &MessageFilter,
        sort: MessageSort,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>>;
}

/// Singleton scheduler flag plus the append-only start/stop log.
#[async_trait]
pub trait SchedulerStateStore: Send + Sync {
    /// Read the state, persisting a default inactive record when absent.
    async fn get_or_create_default(&self, id: &str) -> Result<SchedulerState>;

    async fn upsert(&self, state: &SchedulerState) -> Result<()>;

    async fn append_event(&self, event: &SchedulerEvent) -> Result<()>;

    async fn latest_event(&self) -> Result<Option<SchedulerEvent>>;
}

/// Best-effort "already delivered" hint. Never authoritative.
#[async_trait]
pub trait DeliveryCache: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}
