//! Delivery driver.
//!
//! Drains the sync queue against the remote store. A pass claims batches in
//! priority order and resolves each entry independently, so one failing
//! record never blocks its siblings. At most one pass runs at a time: a pass
//! requested while another is running joins it and returns its summary.
//!
//! The background loop ([`DeliveryDriver::spawn`]) is a single task woken by
//! the poll timer, by connectivity coming back, or by [`DeliveryDriver::request_pass`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::connectivity::ConnectivityMonitor;
use super::entry::{Resolution, ResolveOutcome, SyncQueueEntry};
use super::priority::Priority;
use super::queue::{ClaimRequest, SyncQueue};
use super::record::RecordId;
use super::remote::RemoteAcceptance;
use super::store::RecordStore;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::storage::timestamp;

/// Reason recorded on entries whose record is missing from the store.
pub const ORPHAN_REASON: &str = "record missing from store";

/// Delivery driver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Entries claimed per batch
    pub batch_size: usize,
    /// Pause between items
    pub item_delay: Duration,
    /// Background timer period
    pub poll_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            item_delay: Duration::from_millis(100),
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl From<&SyncConfig> for DriverConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            item_delay: Duration::from_millis(config.item_delay_ms),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }
}

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassTrigger {
    /// Background poll timer
    Timer,
    /// Network came back
    ConnectivityRestored,
    /// Explicit `force_sync` call
    Forced,
    /// Background wake-up after new work was queued
    Requested,
}

impl PassTrigger {
    /// Short name for logs and output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::ConnectivityRestored => "connectivity_restored",
            Self::Forced => "forced",
            Self::Requested => "requested",
        }
    }

    /// Whether entries still inside their retry backoff window are skipped.
    #[must_use]
    pub const fn honors_backoff(self) -> bool {
        matches!(self, Self::Timer | Self::Requested)
    }
}

impl std::fmt::Display for PassTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Driver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    /// No pass running
    Idle,
    /// A pass is running
    Running,
    /// Shut down; no further passes
    Stopped,
}

impl DriverState {
    /// Short name for output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// Outcome of one item in a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Accepted remotely and marked synced
    Synced,
    /// Failed transiently and requeued
    Retrying {
        /// Priority after escalation
        priority: Priority,
        /// Failed attempts on this entry
        attempts: u32,
        /// End of the backoff window
        retry_at: Option<DateTime<Utc>>,
        /// Failure reason
        reason: String,
    },
    /// Refused or out of retries
    FailedPermanent {
        /// Failed attempts on this entry
        attempts: u32,
        /// Failure reason
        reason: String,
    },
    /// Entry referred to a record that does not exist
    Orphaned,
    /// Entry was resolved elsewhere before this item finished
    AlreadyResolved,
}

/// Per-record line of a pass summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResult {
    /// Record delivered
    pub record_id: RecordId,
    /// What happened
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Result of one delivery pass.
///
/// `orphaned` entries are also counted in `failed_permanent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPassSummary {
    /// What started the pass
    pub trigger: PassTrigger,
    /// Pass start
    pub started_at: DateTime<Utc>,
    /// Pass end
    pub finished_at: DateTime<Utc>,
    /// Records accepted
    pub succeeded: usize,
    /// Records requeued after a transient failure
    pub retried: usize,
    /// Records moved to `failed_permanent`
    pub failed_permanent: usize,
    /// Orphaned entries
    pub orphaned: usize,
    /// Whether this caller joined a pass started by someone else
    pub coalesced: bool,
    /// Per-record outcomes in processing order
    pub results: Vec<ItemResult>,
}

impl SyncPassSummary {
    fn new(trigger: PassTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            trigger,
            started_at,
            finished_at: started_at,
            succeeded: 0,
            retried: 0,
            failed_permanent: 0,
            orphaned: 0,
            coalesced: false,
            results: Vec::new(),
        }
    }

    fn push(&mut self, record_id: RecordId, outcome: ItemOutcome) {
        match &outcome {
            ItemOutcome::Synced => self.succeeded += 1,
            ItemOutcome::Retrying { .. } => self.retried += 1,
            ItemOutcome::FailedPermanent { .. } => self.failed_permanent += 1,
            ItemOutcome::Orphaned => {
                self.failed_permanent += 1;
                self.orphaned += 1;
            },
            ItemOutcome::AlreadyResolved => {},
        }
        self.results.push(ItemResult { record_id, outcome });
    }

    /// Items processed.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    /// Whether every processed item was delivered.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.retried == 0 && self.failed_permanent == 0
    }
}

#[derive(Debug, Clone, Default)]
struct PassHistory {
    generation: u64,
    last: Option<Arc<SyncPassSummary>>,
    last_failure: Option<String>,
}

struct Inner {
    queue: SyncQueue,
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteAcceptance>,
    config: DriverConfig,
    pass_lock: Mutex<()>,
    state: watch::Sender<DriverState>,
    history: watch::Sender<PassHistory>,
    wake: Notify,
}

impl Inner {
    fn is_stopped(&self) -> bool {
        *self.state.borrow() == DriverState::Stopped
    }
}

/// Run queue or store work on the blocking pool so `SQLite` fsyncs never
/// stall the async workers.
async fn blocking<T, F>(f: F) -> Result<T, SyncError>
where
    F: FnOnce() -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::Database(format!("blocking task failed: {e}")))?
}

/// Delivery driver handle. Clones share the same driver.
#[derive(Clone)]
pub struct DeliveryDriver {
    inner: Arc<Inner>,
}

impl DeliveryDriver {
    /// Create an idle driver.
    #[must_use]
    pub fn new(
        queue: SyncQueue,
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteAcceptance>,
        config: DriverConfig,
    ) -> Self {
        let (state, _) = watch::channel(DriverState::Idle);
        let (history, _) = watch::channel(PassHistory::default());

        Self {
            inner: Arc::new(Inner {
                queue,
                store,
                remote,
                config,
                pass_lock: Mutex::new(()),
                state,
                history,
                wake: Notify::new(),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        *self.inner.state.borrow()
    }

    /// Whether a pass is running right now.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == DriverState::Running
    }

    /// Receiver that observes state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.inner.state.subscribe()
    }

    /// Summary of the most recent completed pass.
    #[must_use]
    pub fn last_summary(&self) -> Option<Arc<SyncPassSummary>> {
        self.inner.history.borrow().last.clone()
    }

    /// When the most recent pass finished.
    #[must_use]
    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.inner.history.borrow().last.as_ref().map(|s| s.finished_at)
    }

    /// Settings in effect.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Run one pass now and wait for it.
    ///
    /// Backoff windows are ignored. If a pass is already running this call
    /// joins it instead of starting another.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DriverStopped`] after [`stop`](Self::stop), or a
    /// database error if the queue or store is inaccessible.
    pub async fn force_sync(&self) -> Result<SyncPassSummary, SyncError> {
        self.run_pass(PassTrigger::Forced).await
    }

    /// Ask the background loop for a pass without waiting for it.
    pub fn request_pass(&self) {
        self.inner.wake.notify_one();
    }

    /// Run one pass with an explicit trigger, or join the running one.
    ///
    /// # Errors
    ///
    /// Same as [`force_sync`](Self::force_sync).
    pub async fn run_pass(&self, trigger: PassTrigger) -> Result<SyncPassSummary, SyncError> {
        let inner = &self.inner;
        let seen = inner.history.borrow().generation;

        if inner.is_stopped() {
            return Err(SyncError::DriverStopped);
        }

        let Ok(guard) = inner.pass_lock.try_lock() else {
            debug!(%trigger, "pass already running, joining it");
            return self.join_running_pass(seen).await;
        };

        // stop() may have won the race for the lock
        if inner.is_stopped() {
            return Err(SyncError::DriverStopped);
        }

        inner.state.send_replace(DriverState::Running);
        let result = self.execute_pass(trigger).await;

        inner.state.send_if_modified(|state| {
            if *state == DriverState::Running {
                *state = DriverState::Idle;
                true
            } else {
                false
            }
        });

        // A caller that reads the new generation must also find the lock free
        drop(guard);
        inner.history.send_modify(|history| {
            history.generation += 1;
            match &result {
                Ok(summary) => {
                    history.last = Some(Arc::new(summary.clone()));
                    history.last_failure = None;
                },
                Err(e) => history.last_failure = Some(e.to_string()),
            }
        });

        result
    }

    async fn join_running_pass(&self, seen: u64) -> Result<SyncPassSummary, SyncError> {
        let mut rx = self.inner.history.subscribe();
        let history = rx
            .wait_for(|h| h.generation > seen)
            .await
            .map_err(|_| SyncError::DriverStopped)?;

        if let Some(failure) = &history.last_failure {
            return Err(SyncError::Database(failure.clone()));
        }
        let mut summary = history
            .last
            .as_deref()
            .cloned()
            .ok_or(SyncError::DriverStopped)?;
        summary.coalesced = true;
        Ok(summary)
    }

    async fn execute_pass(&self, trigger: PassTrigger) -> Result<SyncPassSummary, SyncError> {
        let inner = &self.inner;
        let mut summary = SyncPassSummary::new(trigger, timestamp::now());

        // Entries requeued during this pass get a higher seq and wait for the next one
        let queue = inner.queue.clone();
        let request = ClaimRequest {
            max_count: inner.config.batch_size.max(1),
            seq_ceiling: Some(blocking(move || queue.current_seq()).await?),
            honor_backoff: trigger.honors_backoff(),
        };

        loop {
            let queue = inner.queue.clone();
            let batch = blocking(move || queue.claim(&request)).await?;
            if batch.is_empty() {
                break;
            }
            debug!(size = batch.len(), "claimed batch");
            self.deliver_batch(batch, &mut summary).await?;

            if inner.is_stopped() {
                info!("driver stopping, ending pass after current batch");
                break;
            }
        }

        summary.finished_at = timestamp::now();
        info!(
            %trigger,
            succeeded = summary.succeeded,
            retried = summary.retried,
            failed_permanent = summary.failed_permanent,
            orphaned = summary.orphaned,
            "sync pass finished"
        );
        Ok(summary)
    }

    async fn deliver_batch(
        &self,
        batch: Vec<SyncQueueEntry>,
        summary: &mut SyncPassSummary,
    ) -> Result<(), SyncError> {
        let inner = &self.inner;
        let mut pending: VecDeque<SyncQueueEntry> = batch.into();

        while let Some(entry) = pending.pop_front() {
            let record_id = entry.record_id;

            let store = Arc::clone(&inner.store);
            let id = record_id.clone();
            let record = match blocking(move || store.get(&id)).await {
                Ok(record) => record,
                Err(e) => {
                    self.release_unprocessed(record_id, pending).await;
                    return Err(e);
                },
            };

            let orphan = record.is_none();
            let outcome = match record {
                None => {
                    error!(orphan = true, %record_id, "queue entry has no record");
                    ResolveOutcome::PermanentFailure(ORPHAN_REASON.to_string())
                },
                Some(record) if record.sync_state.synced => {
                    debug!(%record_id, "record already synced, dropping entry");
                    ResolveOutcome::Success
                },
                Some(record) => {
                    debug!(%record_id, priority = %entry.priority, "submitting record");
                    inner.remote.submit(&record).await.into_resolve_outcome()
                },
            };

            let queue = inner.queue.clone();
            let (id, resolved) = (record_id.clone(), outcome.clone());
            let resolution = match blocking(move || queue.resolve(&id, &resolved)).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    self.release_unprocessed(record_id, pending).await;
                    return Err(e);
                },
            };

            let reason = outcome.reason().unwrap_or_default().to_string();
            let item = match resolution {
                Resolution::Synced => ItemOutcome::Synced,
                Resolution::Requeued {
                    priority,
                    attempts,
                    retry_at,
                } => {
                    warn!(%record_id, attempts, %priority, %reason, "delivery failed, will retry");
                    ItemOutcome::Retrying {
                        priority,
                        attempts,
                        retry_at,
                        reason,
                    }
                },
                Resolution::FailedPermanent { .. } if orphan => ItemOutcome::Orphaned,
                Resolution::FailedPermanent { attempts } => {
                    warn!(%record_id, attempts, %reason, "delivery failed permanently");
                    ItemOutcome::FailedPermanent { attempts, reason }
                },
                Resolution::AlreadyResolved => ItemOutcome::AlreadyResolved,
            };
            summary.push(record_id, item);

            if !pending.is_empty() && !inner.config.item_delay.is_zero() {
                tokio::time::sleep(inner.config.item_delay).await;
            }
        }

        Ok(())
    }

    async fn release_unprocessed(&self, current: RecordId, pending: VecDeque<SyncQueueEntry>) {
        let ids: Vec<RecordId> = std::iter::once(current)
            .chain(pending.into_iter().map(|e| e.record_id))
            .collect();
        let queue = self.inner.queue.clone();
        match blocking(move || queue.release(&ids)).await {
            Ok(released) => warn!(released, "pass aborted, released claimed entries"),
            Err(e) => error!(error = %e, "failed to release claimed entries"),
        }
    }

    /// Stop the driver.
    ///
    /// Waits for the running pass to finish its current batch. Afterwards every
    /// pass request fails with [`SyncError::DriverStopped`] and the background
    /// loop exits. Calling this again is a no-op.
    pub async fn stop(&self) {
        let previous = self.inner.state.send_replace(DriverState::Stopped);
        if previous != DriverState::Stopped {
            info!("stopping delivery driver");
        }
        let _guard = self.inner.pass_lock.lock().await;
    }

    /// Start the background loop.
    ///
    /// Timer ticks are skipped while `connectivity` reports offline; an
    /// offline-to-online transition starts a pass right away.
    #[must_use]
    pub fn spawn(&self, connectivity: &ConnectivityMonitor) -> JoinHandle<()> {
        let driver = self.clone();
        let mut online_rx = connectivity.subscribe();

        tokio::spawn(async move {
            let inner = Arc::clone(&driver.inner);
            let mut state_rx = inner.state.subscribe();
            let mut ticker = tokio::time::interval(inner.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut was_online = *online_rx.borrow_and_update();
            let mut connectivity_open = true;

            info!(poll_interval = ?inner.config.poll_interval, "delivery driver started");

            loop {
                let trigger = tokio::select! {
                    biased;

                    _ = state_rx.wait_for(|s| *s == DriverState::Stopped) => break,

                    changed = online_rx.changed(), if connectivity_open => {
                        if changed.is_err() {
                            connectivity_open = false;
                            continue;
                        }
                        let online = *online_rx.borrow_and_update();
                        let restored = online && !was_online;
                        was_online = online;
                        if !restored {
                            continue;
                        }
                        PassTrigger::ConnectivityRestored
                    }

                    _ = ticker.tick() => {
                        if !was_online {
                            debug!("offline, skipping timer pass");
                            continue;
                        }
                        PassTrigger::Timer
                    }

                    () = inner.wake.notified() => {
                        if !was_online {
                            continue;
                        }
                        PassTrigger::Requested
                    }
                };

                match driver.run_pass(trigger).await {
                    Ok(_) => {},
                    Err(SyncError::DriverStopped) => break,
                    Err(e) => error!(error = %e, %trigger, "sync pass failed"),
                }
            }

            info!("delivery driver stopped");
        })
    }
}
