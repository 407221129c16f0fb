//! Sync queue and delivery engine.
//!
//! Records are persisted locally first and delivered to the remote store in
//! order of clinical urgency:
//! - Priority assigned from triage level and emergency actions
//! - Durable, crash-safe queue with at most one live entry per record
//! - Delivery passes with per-record retry, escalation and backoff
//! - Background loop woken by timer, connectivity and explicit requests

pub mod connectivity;
pub mod driver;
pub mod entry;
pub mod priority;
pub mod queue;
pub mod record;
pub mod remote;
pub mod service;
pub mod store;

pub use connectivity::ConnectivityMonitor;
pub use driver::{
    DeliveryDriver, DriverConfig, DriverState, ItemOutcome, ItemResult, PassTrigger,
    SyncPassSummary,
};
pub use entry::{EntryStatus, Resolution, ResolveOutcome, SyncQueueEntry};
pub use priority::{classify, Priority};
pub use queue::{ClaimRequest, QueueConfig, QueueStats, RecoveryReport, SyncQueue};
pub use record::{MedicalRecord, NewRecord, RecordId, SyncState, TriageLevel, ANONYMOUS_EMERGENCY_OWNER};
pub use remote::{HttpRemote, RemoteAcceptance, RemoteOutcome};
pub use service::{SyncService, SyncStatus};
pub use store::{RecordIndex, RecordStore, SqliteRecordStore};
