//! Application-facing sync API.
//!
//! [`SyncService`] owns the one queue, store and driver of the process and
//! hands out references to them; nothing here is global.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::connectivity::ConnectivityMonitor;
use super::driver::{DeliveryDriver, DriverConfig, DriverState, SyncPassSummary};
use super::queue::{QueueConfig, SyncQueue};
use super::record::{MedicalRecord, NewRecord, RecordId};
use super::remote::{HttpRemote, RemoteAcceptance};
use super::store::{RecordIndex, RecordStore, SqliteRecordStore};
use crate::config::{Config, Paths, SyncConfig};
use crate::error::SyncError;
use crate::storage::Database;

/// Snapshot of delivery progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Entries awaiting delivery (queued, in flight or retrying)
    pub queued_count: i64,
    /// Live entries at the most urgent priority
    pub high_priority_count: i64,
    /// Entries waiting out a backoff window
    pub retrying_count: i64,
    /// Entries needing manual intervention
    pub failed_count: i64,
    /// Whether a pass is running
    pub is_running: bool,
    /// Driver lifecycle state
    pub driver_state: DriverState,
    /// When the last pass finished
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Oldest undelivered entry
    pub oldest_pending_at: Option<DateTime<Utc>>,
    /// Connectivity as last reported
    pub online: bool,
}

/// Composition root for the sync engine.
pub struct SyncService {
    queue: SyncQueue,
    store: SqliteRecordStore,
    driver: DeliveryDriver,
    connectivity: ConnectivityMonitor,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    /// Open the on-disk database and deliver over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory, database or HTTP client cannot
    /// be set up.
    pub fn open(config: &Config, paths: &Paths) -> Result<Self, SyncError> {
        paths.ensure_dirs()?;
        let db = Arc::new(Database::open_at(&paths.database)?);
        let remote = Arc::new(HttpRemote::new(&config.remote)?);
        Self::with_remote(db, remote, &config.sync)
    }

    /// Assemble the engine over an open database and a remote.
    ///
    /// Entries left `in_flight` by a previous crash are requeued first.
    ///
    /// # Errors
    ///
    /// Returns an error if crash recovery fails.
    pub fn with_remote(
        db: Arc<Database>,
        remote: Arc<dyn RemoteAcceptance>,
        config: &SyncConfig,
    ) -> Result<Self, SyncError> {
        let queue = SyncQueue::new(Arc::clone(&db), QueueConfig::from(config));
        let store = SqliteRecordStore::new(db);
        let driver = DeliveryDriver::new(
            queue.clone(),
            Arc::new(store.clone()),
            remote,
            DriverConfig::from(config),
        );

        let report = queue.recover_in_flight()?;
        if report.requeued > 0 || report.pruned > 0 {
            warn!(
                requeued = report.requeued,
                pruned = report.pruned,
                "recovered sync queue after unclean shutdown"
            );
        }

        Ok(Self {
            queue,
            store,
            driver,
            connectivity: ConnectivityMonitor::default(),
            background: Mutex::new(None),
        })
    }

    /// Persist a new record and queue it for delivery.
    ///
    /// The record is durable when this returns, whatever the network state.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local database write fails.
    pub fn queue_for_sync(&self, new: NewRecord) -> Result<RecordId, SyncError> {
        let record = MedicalRecord::create(new);
        self.queue.enqueue_record(&record)?;
        info!(
            record_id = %record.id,
            priority = %record.sync_state.priority,
            anonymous = record.is_anonymous(),
            "record queued for sync"
        );
        self.driver.request_pass();
        Ok(record.id)
    }

    /// Run a delivery pass now and wait for it.
    ///
    /// # Errors
    ///
    /// See [`DeliveryDriver::force_sync`].
    pub async fn force_sync(&self) -> Result<SyncPassSummary, SyncError> {
        self.driver.force_sync().await
    }

    /// Current delivery progress.
    ///
    /// # Errors
    ///
    /// Returns an error if queue statistics cannot be read.
    pub fn get_sync_status(&self) -> Result<SyncStatus, SyncError> {
        let stats = self.queue.stats()?;

        Ok(SyncStatus {
            queued_count: stats.live(),
            high_priority_count: stats.high_priority,
            retrying_count: stats.retrying,
            failed_count: stats.failed_permanent,
            is_running: self.driver.is_running(),
            driver_state: self.driver.state(),
            last_sync_at: self.driver.last_sync_at(),
            oldest_pending_at: stats.oldest_live,
            online: self.connectivity.is_online(),
        })
    }

    /// Raise all pending work to the most urgent priority.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn emergency_escalate_all(&self) -> Result<usize, SyncError> {
        let escalated = self.queue.emergency_escalate_all()?;
        warn!(escalated, "emergency escalation applied to sync queue");
        Ok(escalated)
    }

    /// Load a record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if no record has this id.
    pub fn record(&self, id: &str) -> Result<MedicalRecord, SyncError> {
        self.store
            .get(id)?
            .ok_or_else(|| SyncError::NotFound(format!("record {id}")))
    }

    /// Load records by an indexed field.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn records(&self, index: &RecordIndex) -> Result<Vec<MedicalRecord>, SyncError> {
        self.store.query_by_index(index)
    }

    /// Start the background delivery loop. Does nothing if it is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let Ok(mut background) = self.background.lock() else {
            return;
        };
        if background.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *background = Some(self.driver.spawn(&self.connectivity));
    }

    /// Stop the driver and wait for the background loop to exit.
    pub async fn stop(&self) {
        self.driver.stop().await;

        let handle = self.background.lock().ok().and_then(|mut b| b.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "delivery loop ended abnormally");
            }
        }
    }

    /// The sync queue.
    #[must_use]
    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// The record store.
    #[must_use]
    pub const fn store(&self) -> &SqliteRecordStore {
        &self.store
    }

    /// The delivery driver.
    #[must_use]
    pub const fn driver(&self) -> &DeliveryDriver {
        &self.driver
    }

    /// Connectivity signal feeding the driver.
    #[must_use]
    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }
}
