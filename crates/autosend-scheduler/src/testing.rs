//! In-process fakes for scheduler tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autosend_core::error::{AutoSendError, Result};
use autosend_core::models::{
    DeliveryAck, DeliveryRequest, Message, MessageStatus, SchedulerEvent, SchedulerState,
};
use autosend_core::traits::{
    DeliveryCache, MessageFilter, MessageSort, MessageStore, SchedulerStateStore,
};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::delivery::{Deliver, DeliveryError};

enum Mode {
    Accept,
    Reject,
}

/// Deliverer that answers without any network. Ack ids are `ext-{to}`.
pub(crate) struct FakeDeliverer {
    mode: Mode,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl FakeDeliverer {
    fn with_mode(mode: Mode, gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            mode,
            gate,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn accepting() -> Self {
        Self::with_mode(Mode::Accept, None)
    }

    pub(crate) fn rejecting() -> Self {
        Self::with_mode(Mode::Reject, None)
    }

    /// Accepts, but each send first waits for a permit from `gate`.
    pub(crate) fn gated(gate: Arc<Semaphore>) -> Self {
        Self::with_mode(Mode::Accept, Some(gate))
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Recipient and time of every send, in call order.
    pub(crate) fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deliver for FakeDeliverer {
    async fn send(&self, request: &DeliveryRequest) -> std::result::Result<DeliveryAck, DeliveryError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.to.clone(), Instant::now()));

        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.map_err(|_| DeliveryError::Cancelled)?;
            permit.forget();
        }

        match self.mode {
            Mode::Accept => Ok(DeliveryAck {
                message: "Accepted".into(),
                message_id: format!("ext-{}", request.to),
            }),
            Mode::Reject => Err(DeliveryError::Status {
                status: 500,
                body: "upstream unavailable".into(),
            }),
        }
    }

    fn backoff_unit(&self) -> Duration {
        Duration::from_millis(1)
    }
}

/// Cache whose every call errors.
pub(crate) struct FailingCache;

#[async_trait]
impl DeliveryCache for FailingCache {
    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Err(AutoSendError::Store("cache unavailable".into()))
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Err(AutoSendError::Store("cache unavailable".into()))
    }
}

/// Wraps a real state store; upserts can be switched to fail.
pub(crate) struct FlakyStateStore<S> {
    inner: Arc<S>,
    fail_upserts: AtomicBool,
}

impl<S> FlakyStateStore<S> {
    pub(crate) fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            fail_upserts: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: SchedulerStateStore> SchedulerStateStore for FlakyStateStore<S> {
    async fn get_or_create_default(&self, id: &str) -> Result<SchedulerState> {
        self.inner.get_or_create_default(id).await
    }

    async fn upsert(&self, state: &SchedulerState) -> Result<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(AutoSendError::Store("disk I/O error".into()));
        }
        self.inner.upsert(state).await
    }

    async fn append_event(&self, event: &SchedulerEvent) -> Result<()> {
        self.inner.append_event(event).await
    }

    async fn latest_event(&self) -> Result<Option<SchedulerEvent>> {
        self.inner.latest_event().await
    }
}

/// Wraps a real message store; the next `n` calls to `find` fail.
pub(crate) struct FlakyMessageStore<S> {
    inner: Arc<S>,
    failing_finds: AtomicUsize,
}

impl<S> FlakyMessageStore<S> {
    pub(crate) fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            failing_finds: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_next_finds(&self, n: usize) {
        self.failing_finds.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: MessageStore> MessageStore for FlakyMessageStore<S> {
    async fn insert(&self, message: &Message) -> Result<()> {
        self.inner.insert(message).await
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        self.inner.get(id).await
    }

    async fn find(&self, filter: &MessageFilter, sort: MessageSort, limit: usize) -> Result<Vec<Message>> {
        let failing = self
            .failing_finds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AutoSendError::Store("database is locked".into()));
        }
        self.inner.find(filter, sort, limit).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: MessageStatus,
        external_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.inner.update_status(id, status, external_id, error).await
    }

    async fn count(&self, filter: &MessageFilter) -> Result<u64> {
        self.inner.count(filter).await
    }

    async fn find_page(
        &self,
        filter: &MessageFilter,
        sort: MessageSort,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.inner.find_page(filter, sort, skip, limit).await
    }
}
