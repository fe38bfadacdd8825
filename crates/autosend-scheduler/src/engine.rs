//! Dispatch scheduler: the start/stop state machine and the tick loop.
//! A single tokio interval drives ticks; each tick fans out into tracked
//! tasks that `stop()` drains before it returns.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use autosend_core::config::{DeliveryConfig, SchedulerConfig};
use autosend_core::error::{AutoSendError, Result};
use autosend_core::models::{SCHEDULER_STATE_ID, SchedulerEvent, SchedulerState};
use autosend_core::traits::{DeliveryCache, MessageFilter, MessageSort, MessageStore, SchedulerStateStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::delivery::Deliver;
use crate::dispatch::{DispatchContext, dispatch_message};

/// Tuning for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub interval: Duration,
    pub messages_per_interval: usize,
    pub max_retry_count: u32,
    pub max_attempts: u32,
    pub cache_ttl: Duration,
}

impl DispatchOptions {
    pub fn from_config(scheduler: &SchedulerConfig, delivery: &DeliveryConfig) -> Self {
        Self {
            interval: scheduler.interval(),
            messages_per_interval: scheduler.messages_per_interval as usize,
            max_retry_count: scheduler.max_retry_count,
            max_attempts: delivery.max_attempts,
            cache_ttl: scheduler.cache_ttl(),
        }
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default(), &DeliveryConfig::default())
    }
}

/// Result of a successful `start()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartOutcome {
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
}

/// Result of a successful `stop()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopOutcome {
    pub is_active: bool,
    pub stopped_at: DateTime<Utc>,
}

/// Durable scheduler status as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl From<SchedulerState> for StatusView {
    fn from(state: SchedulerState) -> Self {
        Self {
            is_active: state.is_active,
            started_at: state.started_at,
            stopped_at: state.stopped_at,
        }
    }
}

enum Lifecycle {
    Stopped,
    Running(RunningState),
}

struct RunningState {
    ticker: JoinHandle<()>,
    shutdown: CancellationToken,
    /// Id of the `start` audit event, referenced by the matching `stop`.
    start_event_id: Option<String>,
}

/// Shared between the ticker task and the scheduler handle.
struct TickWorker {
    ctx: Arc<DispatchContext>,
    tracker: TaskTracker,
    /// Ids currently being dispatched; a later tick must not pick them up again.
    in_flight_ids: Arc<StdMutex<HashSet<String>>>,
    interval: Duration,
    messages_per_interval: usize,
    max_retry_count: u32,
}

/// Removes a message id from the in-flight set when the dispatch task ends.
struct InFlightGuard {
    ids: Arc<StdMutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.remove(&self.id);
        }
    }
}

impl TickWorker {
    /// One tick: fetch a bounded batch and launch a tracked task per message.
    /// Returns the number of dispatches launched.
    async fn tick(&self, shutdown: &CancellationToken) -> usize {
        let filter = MessageFilter::dispatchable(self.max_retry_count);
        let batch = match self
            .ctx
            .messages
            .find(&filter, MessageSort::CreatedAsc, self.messages_per_interval)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "Failed to get pending messages; skipping tick");
                return 0;
            }
        };

        if batch.is_empty() {
            tracing::debug!("No pending messages to process");
            return 0;
        }

        if shutdown.is_cancelled() {
            tracing::debug!(count = batch.len(), "Scheduler stopping; dropping fetched batch");
            return 0;
        }

        tracing::info!(message_count = batch.len(), "Processing messages");

        let mut launched = 0;
        for message in batch {
            let guard = {
                let Ok(mut ids) = self.in_flight_ids.lock() else {
                    tracing::error!("In-flight set poisoned; skipping tick");
                    return launched;
                };
                if !ids.insert(message.id.clone()) {
                    tracing::debug!(message_id = %message.id, "Message still in flight; skipping");
                    continue;
                }
                InFlightGuard {
                    ids: self.in_flight_ids.clone(),
                    id: message.id.clone(),
                }
            };

            let ctx = self.ctx.clone();
            let cancel = shutdown.clone();
            self.tracker.spawn(async move {
                let _guard = guard;
                dispatch_message(&ctx, &message, &cancel).await;
            });
            launched += 1;
        }
        launched
    }
}

/// Repeating timer: first tick one interval after start, stops on `shutdown`.
async fn run_ticker(worker: Arc<TickWorker>, shutdown: CancellationToken) {
    let period = worker.interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                worker.tick(&shutdown).await;
            }
        }
    }
    tracing::debug!("Ticker loop exited");
}

/// Owns the periodic dispatch lifecycle.
pub struct DispatchScheduler {
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    /// Set by `shutdown()`; no start is accepted afterwards.
    closed: AtomicBool,
    state_store: Arc<dyn SchedulerStateStore>,
    worker: Arc<TickWorker>,
}

fn persistence(e: AutoSendError) -> AutoSendError {
    AutoSendError::Persistence(e.to_string())
}

impl DispatchScheduler {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        state_store: Arc<dyn SchedulerStateStore>,
        cache: Arc<dyn DeliveryCache>,
        deliverer: Arc<dyn Deliver>,
        options: DispatchOptions,
    ) -> Self {
        let ctx = DispatchContext {
            messages,
            cache,
            deliverer,
            max_attempts: options.max_attempts,
            cache_ttl: options.cache_ttl,
        };
        let worker = TickWorker {
            ctx: Arc::new(ctx),
            tracker: TaskTracker::new(),
            in_flight_ids: Arc::new(StdMutex::new(HashSet::new())),
            interval: options.interval,
            messages_per_interval: options.messages_per_interval,
            max_retry_count: options.max_retry_count,
        };
        Self {
            lifecycle: Mutex::new(Lifecycle::Stopped),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state_store,
            worker: Arc::new(worker),
        }
    }

    /// Start periodic dispatch. Fails with `AlreadyRunning` when running,
    /// `ShuttingDown` after `shutdown()`, `Config` for a zero interval, or
    /// `Persistence` when the active flag cannot be written.
    pub async fn start(&self) -> Result<StartOutcome> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(AutoSendError::ShuttingDown);
        }
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            return Err(AutoSendError::AlreadyRunning);
        }
        if self.worker.interval.is_zero() {
            return Err(AutoSendError::Config("scheduler interval must be greater than zero".into()));
        }

        let now = Utc::now();
        let mut state = self
            .state_store
            .get_or_create_default(SCHEDULER_STATE_ID)
            .await
            .map_err(persistence)?;
        state.mark_started(now);
        if let Err(e) = self.state_store.upsert(&state).await {
            tracing::error!(error = %e, "Failed to update scheduler status");
            return Err(persistence(e));
        }

        let event = SchedulerEvent::start();
        let start_event_id = match self.state_store.append_event(&event).await {
            Ok(()) => Some(event.id),
            Err(e) => {
                tracing::error!(error = %e, "Failed to record scheduler start event");
                None
            }
        };

        self.worker.tracker.reopen();
        let shutdown = CancellationToken::new();
        let ticker = tokio::spawn(run_ticker(self.worker.clone(), shutdown.clone()));

        *lifecycle = Lifecycle::Running(RunningState {
            ticker,
            shutdown,
            start_event_id,
        });
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            interval_secs = self.worker.interval.as_secs(),
            messages_per_interval = self.worker.messages_per_interval,
            "⏰ Message scheduler started"
        );
        Ok(StartOutcome {
            is_active: true,
            started_at: now,
        })
    }

    /// Stop periodic dispatch and wait for every in-flight delivery to finish.
    /// Fails with `NotRunning` when stopped, or `Persistence` when the inactive
    /// flag cannot be written (the scheduler then keeps running).
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await
    }

    /// Refuse further starts, then stop and drain if running. Returns `None`
    /// when the scheduler was already stopped.
    pub async fn shutdown(&self) -> Result<Option<StopOutcome>> {
        self.closed.store(true, Ordering::SeqCst);
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Stopped) {
            return Ok(None);
        }
        self.stop_locked(&mut lifecycle).await.map(Some)
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) -> Result<StopOutcome> {
        let start_event_id = match &*lifecycle {
            Lifecycle::Running(running) => running.start_event_id.clone(),
            Lifecycle::Stopped => return Err(AutoSendError::NotRunning),
        };

        let now = Utc::now();
        let mut state = self
            .state_store
            .get_or_create_default(SCHEDULER_STATE_ID)
            .await
            .map_err(persistence)?;
        state.mark_stopped(now);
        if let Err(e) = self.state_store.upsert(&state).await {
            tracing::error!(error = %e, "Failed to update scheduler status");
            return Err(persistence(e));
        }

        let event = SchedulerEvent::stop(start_event_id);
        if let Err(e) = self.state_store.append_event(&event).await {
            tracing::error!(error = %e, "Failed to record scheduler stop event");
        }

        if let Lifecycle::Running(running) = std::mem::replace(lifecycle, Lifecycle::Stopped) {
            running.shutdown.cancel();
            if let Err(e) = running.ticker.await {
                tracing::warn!(error = %e, "Ticker task ended abnormally");
            }

            tracing::info!(in_flight = self.worker.tracker.len(), "Waiting for active jobs to complete...");
            self.worker.tracker.close();
            self.worker.tracker.wait().await;
            tracing::info!("All jobs completed, scheduler stopped");
        }
        self.running.store(false, Ordering::SeqCst);

        Ok(StopOutcome {
            is_active: false,
            stopped_at: now,
        })
    }

    /// Persisted status. Does not touch the lifecycle lock, so it never waits
    /// on a running transition; the stored flag wins over in-memory state.
    pub async fn status(&self) -> Result<StatusView> {
        let state = self.state_store.get_or_create_default(SCHEDULER_STATE_ID).await?;
        Ok(StatusView::from(state))
    }

    /// Restart dispatch if the persisted flag says the scheduler was active.
    pub async fn resume_if_active(&self) -> Result<bool> {
        let status = self.status().await?;
        if !status.is_active || self.is_running() {
            return Ok(false);
        }
        tracing::info!("🔄 Scheduler was active before shutdown; resuming");
        self.start().await?;
        Ok(true)
    }

    /// In-memory running flag.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Dispatch tasks launched by ticks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.worker.tracker.len()
    }
}
