//! Sync queue storage and management.
//!
//! A durable, priority-ordered work list over unsynced records. Every status
//! transition is a single `SQLite` transaction, so a crash never leaves an
//! entry half-claimed: on restart [`SyncQueue::recover_in_flight`] returns
//! lingering `in_flight` entries to `queued`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use super::entry::{EntryStatus, Resolution, ResolveOutcome, SyncQueueEntry};
use super::priority::Priority;
use super::record::MedicalRecord;
use super::store::put_record;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::storage::{timestamp, Database};

/// Retry policy for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Failed attempts before an entry becomes permanently failed
    pub max_retries: u32,
    /// Base backoff, doubled per failed attempt; zero requeues immediately
    pub retry_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for QueueConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

impl QueueConfig {
    /// Backoff before the next attempt after `attempts` failures.
    #[must_use]
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        if self.retry_backoff.is_zero() || attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(attempts - 1);
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Parameters for claiming a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Maximum entries to claim
    pub max_count: usize,
    /// Only claim entries with `seq <= ceiling`
    pub seq_ceiling: Option<i64>,
    /// Leave retrying entries alone until their backoff window has passed
    pub honor_backoff: bool,
}

impl ClaimRequest {
    /// Claim up to `max_count` eligible entries.
    #[must_use]
    pub const fn new(max_count: usize) -> Self {
        Self {
            max_count,
            seq_ceiling: None,
            honor_backoff: true,
        }
    }
}

/// Result of crash recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `in_flight` entries returned to `queued`
    pub requeued: usize,
    /// Entries removed because their record is already synced
    pub pruned: usize,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries waiting to be claimed
    pub queued: i64,
    /// Entries held by a delivery batch
    pub in_flight: i64,
    /// Entries waiting out a backoff window
    pub retrying: i64,
    /// Entries excluded from automatic delivery
    pub failed_permanent: i64,
    /// Live entries at the most urgent priority
    pub high_priority: i64,
    /// Oldest live entry timestamp
    pub oldest_live: Option<DateTime<Utc>>,
}

impl QueueStats {
    /// All entries still taking part in automatic delivery.
    #[must_use]
    pub const fn live(&self) -> i64 {
        self.queued + self.in_flight + self.retrying
    }
}

/// Sync queue over the shared database.
#[derive(Clone)]
pub struct SyncQueue {
    db: Arc<Database>,
    config: QueueConfig,
}

impl SyncQueue {
    /// Create a sync queue with an explicit retry policy.
    #[must_use]
    pub const fn new(db: Arc<Database>, config: QueueConfig) -> Self {
        Self { db, config }
    }

    /// Create a sync queue with the default retry policy.
    #[must_use]
    pub fn with_database(db: Arc<Database>) -> Self {
        Self::new(db, QueueConfig::default())
    }

    /// Retry policy in effect.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Persist a new record and its queue entry in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if either write fails; neither is then visible.
    pub fn enqueue_record(&self, record: &MedicalRecord) -> Result<(), SyncError> {
        self.db.transaction(|tx| {
            put_record(tx, record)?;
            if !record.sync_state.synced {
                enqueue_in(tx, &record.id, record.sync_state.priority)?;
            }
            Ok(())
        })
    }

    /// Add a queued entry for `record_id`.
    ///
    /// If a live entry already exists only its priority changes, to the more
    /// urgent of the two. Synced records and permanently failed entries are
    /// left alone. Returns `true` if a new entry was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn enqueue(&self, record_id: &str, priority: Priority) -> Result<bool, SyncError> {
        self.db.transaction(|tx| enqueue_in(tx, record_id, priority))
    }

    /// Claim up to `max_count` entries in `(priority, enqueued_at)` order,
    /// marking them `in_flight`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn dequeue_batch(&self, max_count: usize) -> Result<Vec<SyncQueueEntry>, SyncError> {
        self.claim(&ClaimRequest::new(max_count))
    }

    /// Claim a batch with explicit eligibility rules.
    ///
    /// Ordering is evaluated at claim time, so priority changes made since
    /// enqueue are honoured.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn claim(&self, request: &ClaimRequest) -> Result<Vec<SyncQueueEntry>, SyncError> {
        if request.max_count == 0 {
            return Ok(Vec::new());
        }
        let ceiling = request.seq_ceiling.unwrap_or(i64::MAX);
        let limit = i64::try_from(request.max_count).unwrap_or(i64::MAX);

        self.db.transaction(|tx| {
            let now = timestamp::to_db(timestamp::now());

            // Retrying entries whose window has passed rejoin the queue
            if request.honor_backoff {
                tx.execute(
                    r"UPDATE sync_queue SET status = 'queued', not_before = NULL
                      WHERE status = 'retrying' AND seq <= ?1
                        AND (not_before IS NULL OR not_before <= ?2)",
                    params![ceiling, now],
                )
            } else {
                tx.execute(
                    r"UPDATE sync_queue SET status = 'queued', not_before = NULL
                      WHERE status = 'retrying' AND seq <= ?1",
                    params![ceiling],
                )
            }
            .map_err(|e| SyncError::Database(format!("Failed to promote retrying entries: {e}")))?;

            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM sync_queue
                     WHERE status = 'queued' AND seq <= ?1
                     ORDER BY priority ASC, enqueued_at ASC, seq ASC
                     LIMIT ?2"
                ))
                .map_err(|e| SyncError::Database(format!("Failed to prepare claim: {e}")))?;

            let rows = stmt
                .query_map(params![ceiling, limit], row_to_entry)
                .map_err(|e| SyncError::Database(format!("Failed to query queue: {e}")))?;

            let mut batch = Vec::new();
            for row in rows {
                batch.push(row.map_err(|e| SyncError::Database(e.to_string()))?);
            }
            drop(stmt);

            for entry in &mut batch {
                tx.execute(
                    "UPDATE sync_queue SET status = 'in_flight' WHERE record_id = ?1",
                    [&entry.record_id],
                )
                .map_err(|e| SyncError::Database(format!("Failed to claim entry: {e}")))?;
                entry.status = EntryStatus::InFlight;
            }

            Ok(batch)
        })
    }

    /// Apply the outcome of a delivery attempt.
    ///
    /// The entry and the record's sync state change in one transaction.
    /// Resolving an entry that no longer exists (or is already permanently
    /// failed) writes nothing and returns [`Resolution::AlreadyResolved`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn resolve(
        &self,
        record_id: &str,
        outcome: &ResolveOutcome,
    ) -> Result<Resolution, SyncError> {
        self.db.transaction(|tx| {
            let Some(entry) = get_entry(tx, record_id)? else {
                return Ok(Resolution::AlreadyResolved);
            };
            if !entry.status.is_live() {
                return Ok(Resolution::AlreadyResolved);
            }

            let now = timestamp::now();
            let now_db = timestamp::to_db(now);
            let attempts = entry.attempts.saturating_add(1);

            match outcome {
                ResolveOutcome::Success => {
                    tx.execute("DELETE FROM sync_queue WHERE record_id = ?1", [record_id])
                        .map_err(|e| {
                            SyncError::Database(format!("Failed to remove entry: {e}"))
                        })?;
                    tx.execute(
                        r"UPDATE medical_records SET
                          synced = 1,
                          attempts = attempts + 1,
                          last_attempt_at = ?1,
                          last_error = NULL,
                          updated_at = ?1
                          WHERE id = ?2 AND synced = 0",
                        params![now_db, record_id],
                    )
                    .map_err(|e| SyncError::Database(format!("Failed to mark synced: {e}")))?;

                    Ok(Resolution::Synced)
                },
                ResolveOutcome::RetryableFailure(error) if attempts < self.config.max_retries => {
                    let priority = entry.priority.escalated();
                    let backoff = self.config.backoff_for(attempts);
                    let retry_at = (!backoff.is_zero())
                        .then(|| chrono::Duration::from_std(backoff).ok())
                        .flatten()
                        .map(|d| now + d);
                    let status = if retry_at.is_some() {
                        EntryStatus::Retrying
                    } else {
                        EntryStatus::Queued
                    };
                    let seq = next_seq(tx)?;

                    tx.execute(
                        r"UPDATE sync_queue SET
                          status = ?1,
                          priority = MIN(priority, ?2),
                          enqueued_at = ?3,
                          seq = ?4,
                          attempts = ?5,
                          not_before = ?6,
                          last_error = ?7
                          WHERE record_id = ?8",
                        params![
                            status.as_str(),
                            priority.value(),
                            now_db,
                            seq,
                            attempts,
                            retry_at.map(timestamp::to_db),
                            error,
                            record_id,
                        ],
                    )
                    .map_err(|e| SyncError::Database(format!("Failed to requeue entry: {e}")))?;
                    record_failed_attempt(tx, record_id, &now_db, error, Some(priority))?;

                    Ok(Resolution::Requeued {
                        priority,
                        attempts,
                        retry_at,
                    })
                },
                ResolveOutcome::RetryableFailure(error) | ResolveOutcome::PermanentFailure(error) => {
                    tx.execute(
                        r"UPDATE sync_queue SET
                          status = 'failed_permanent',
                          attempts = ?1,
                          not_before = NULL,
                          last_error = ?2
                          WHERE record_id = ?3",
                        params![attempts, error, record_id],
                    )
                    .map_err(|e| {
                        SyncError::Database(format!("Failed to mark entry failed: {e}"))
                    })?;
                    record_failed_attempt(tx, record_id, &now_db, error, None)?;

                    Ok(Resolution::FailedPermanent { attempts })
                },
            }
        })
    }

    /// Return claimed entries to `queued` without counting an attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn release(&self, record_ids: &[String]) -> Result<usize, SyncError> {
        self.db.transaction(|tx| {
            let mut released = 0;
            for id in record_ids {
                released += tx
                    .execute(
                        "UPDATE sync_queue SET status = 'queued' WHERE record_id = ?1 AND status = 'in_flight'",
                        [id],
                    )
                    .map_err(|e| SyncError::Database(format!("Failed to release entry: {e}")))?;
            }
            Ok(released)
        })
    }

    /// Raise every live entry (and its record) to the most urgent priority.
    ///
    /// Entries keep their `enqueued_at`, so previously queued work stays
    /// ahead of anything enqueued afterwards. Returns the number of entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn emergency_escalate_all(&self) -> Result<usize, SyncError> {
        self.db.transaction(|tx| {
            let now_db = timestamp::to_db(timestamp::now());

            tx.execute(
                r"UPDATE medical_records SET priority = 1, updated_at = ?1
                  WHERE priority > 1 AND id IN (
                      SELECT record_id FROM sync_queue WHERE status != 'failed_permanent'
                  )",
                [&now_db],
            )
            .map_err(|e| SyncError::Database(format!("Failed to escalate records: {e}")))?;

            let escalated = tx
                .execute(
                    "UPDATE sync_queue SET priority = 1 WHERE status != 'failed_permanent'",
                    [],
                )
                .map_err(|e| SyncError::Database(format!("Failed to escalate queue: {e}")))?;

            Ok(escalated)
        })
    }

    /// Repair state left behind by a crash.
    ///
    /// `in_flight` entries go back to `queued` (their delivery outcome was
    /// never committed) and entries whose record is already synced are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn recover_in_flight(&self) -> Result<RecoveryReport, SyncError> {
        self.db.transaction(|tx| {
            let pruned = tx
                .execute(
                    r"DELETE FROM sync_queue WHERE record_id IN (
                          SELECT id FROM medical_records WHERE synced = 1
                      )",
                    [],
                )
                .map_err(|e| SyncError::Database(format!("Failed to prune entries: {e}")))?;

            let requeued = tx
                .execute(
                    "UPDATE sync_queue SET status = 'queued' WHERE status = 'in_flight'",
                    [],
                )
                .map_err(|e| SyncError::Database(format!("Failed to requeue entries: {e}")))?;

            Ok(RecoveryReport { requeued, pruned })
        })
    }

    /// Re-arm a permanently failed entry with a fresh attempt budget.
    ///
    /// Returns `false` if the record has no permanently failed entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn retry_failed(&self, record_id: &str) -> Result<bool, SyncError> {
        self.db.transaction(|tx| rearm_failed(tx, record_id))
    }

    /// Re-arm every permanently failed entry. Returns how many were re-armed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn retry_all_failed(&self) -> Result<usize, SyncError> {
        self.db.transaction(|tx| {
            let ids = {
                let mut stmt = tx
                    .prepare(
                        r"SELECT record_id FROM sync_queue
                          WHERE status = 'failed_permanent'
                          ORDER BY priority ASC, enqueued_at ASC, seq ASC",
                    )
                    .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|e| SyncError::Database(format!("Failed to query entries: {e}")))?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row.map_err(|e| SyncError::Database(e.to_string()))?);
                }
                ids
            };

            let mut count = 0;
            for id in &ids {
                if rearm_failed(tx, id)? {
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    /// Get the entry for a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, record_id: &str) -> Result<Option<SyncQueueEntry>, SyncError> {
        get_entry(&*self.db.connection()?, record_id)
    }

    /// List entries in claim order, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn entries(&self, status: Option<EntryStatus>) -> Result<Vec<SyncQueueEntry>, SyncError> {
        let conn = self.db.connection()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM sync_queue
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY priority ASC, enqueued_at ASC, seq ASC"
            ))
            .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([status.map(|s| s.as_str())], row_to_entry)
            .map_err(|e| SyncError::Database(format!("Failed to query entries: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| SyncError::Database(e.to_string()))?);
        }
        Ok(entries)
    }

    /// Highest sequence number handed out so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn current_seq(&self) -> Result<i64, SyncError> {
        self.db
            .connection()?
            .query_row("SELECT value FROM sync_sequence WHERE id = 1", [], |row| {
                row.get(0)
            })
            .map_err(|e| SyncError::Database(format!("Failed to read sequence: {e}")))
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<QueueStats, SyncError> {
        let conn = self.db.connection()?;
        let mut stats = QueueStats::default();

        {
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")
                .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| SyncError::Database(format!("Failed to count entries: {e}")))?;

            for row in rows {
                let (status, count) = row.map_err(|e| SyncError::Database(e.to_string()))?;
                match EntryStatus::from_storage(&status) {
                    Some(EntryStatus::Queued) => stats.queued += count,
                    Some(EntryStatus::InFlight) => stats.in_flight += count,
                    Some(EntryStatus::Retrying) => stats.retrying += count,
                    Some(EntryStatus::FailedPermanent) => stats.failed_permanent += count,
                    None => warn!(%status, count, "ignoring queue rows with unknown status"),
                }
            }
        }

        stats.high_priority = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE priority = 1 AND status != 'failed_permanent'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to count urgent entries: {e}")))?;

        let oldest: Option<String> = conn
            .query_row(
                "SELECT MIN(enqueued_at) FROM sync_queue WHERE status != 'failed_permanent'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to get oldest entry: {e}")))?;
        stats.oldest_live = timestamp::from_db_opt(0, oldest.as_deref())?;

        Ok(stats)
    }
}

const ENTRY_COLUMNS: &str =
    "record_id, priority, enqueued_at, seq, status, attempts, not_before, last_error";

fn enqueue_in(conn: &Connection, record_id: &str, priority: Priority) -> Result<bool, SyncError> {
    let synced: Option<bool> = conn
        .query_row(
            "SELECT synced FROM medical_records WHERE id = ?1",
            [record_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| SyncError::Database(format!("Failed to check record: {e}")))?;
    if synced == Some(true) {
        return Ok(false);
    }

    let created = match get_entry(conn, record_id)? {
        Some(entry) if entry.status.is_live() => {
            conn.execute(
                "UPDATE sync_queue SET priority = MIN(priority, ?1) WHERE record_id = ?2",
                params![priority.value(), record_id],
            )
            .map_err(|e| SyncError::Database(format!("Failed to update entry: {e}")))?;
            false
        },
        Some(_) => return Ok(false),
        None => {
            let seq = next_seq(conn)?;
            conn.execute(
                r"INSERT INTO sync_queue (record_id, priority, enqueued_at, seq, status, attempts)
                  VALUES (?1, ?2, ?3, ?4, 'queued', 0)",
                params![
                    record_id,
                    priority.value(),
                    timestamp::to_db(timestamp::now()),
                    seq
                ],
            )
            .map_err(|e| SyncError::Database(format!("Failed to enqueue record: {e}")))?;
            true
        },
    };

    conn.execute(
        "UPDATE medical_records SET priority = MIN(priority, ?1) WHERE id = ?2",
        params![priority.value(), record_id],
    )
    .map_err(|e| SyncError::Database(format!("Failed to update record priority: {e}")))?;

    Ok(created)
}

fn rearm_failed(conn: &Connection, record_id: &str) -> Result<bool, SyncError> {
    let seq = next_seq(conn)?;
    let rows = conn
        .execute(
            r"UPDATE sync_queue SET
              status = 'queued',
              attempts = 0,
              not_before = NULL,
              last_error = NULL,
              enqueued_at = ?1,
              seq = ?2
              WHERE record_id = ?3 AND status = 'failed_permanent'",
            params![timestamp::to_db(timestamp::now()), seq, record_id],
        )
        .map_err(|e| SyncError::Database(format!("Failed to re-arm entry: {e}")))?;
    Ok(rows > 0)
}

fn record_failed_attempt(
    conn: &Connection,
    record_id: &str,
    now_db: &str,
    error: &str,
    priority: Option<Priority>,
) -> Result<(), SyncError> {
    conn.execute(
        r"UPDATE medical_records SET
          attempts = attempts + 1,
          last_attempt_at = ?1,
          last_error = ?2,
          priority = MIN(priority, COALESCE(?3, priority)),
          updated_at = ?1
          WHERE id = ?4",
        params![now_db, error, priority.map(Priority::value), record_id],
    )
    .map_err(|e| SyncError::Database(format!("Failed to record attempt: {e}")))?;
    Ok(())
}

fn next_seq(conn: &Connection) -> Result<i64, SyncError> {
    conn.execute("UPDATE sync_sequence SET value = value + 1 WHERE id = 1", [])
        .map_err(|e| SyncError::Database(format!("Failed to advance sequence: {e}")))?;
    conn.query_row("SELECT value FROM sync_sequence WHERE id = 1", [], |row| {
        row.get(0)
    })
    .map_err(|e| SyncError::Database(format!("Failed to read sequence: {e}")))
}

fn get_entry(conn: &Connection, record_id: &str) -> Result<Option<SyncQueueEntry>, SyncError> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE record_id = ?1"),
        [record_id],
        row_to_entry,
    )
    .optional()
    .map_err(|e| SyncError::Database(format!("Failed to query entry: {e}")))
}

fn row_to_entry(row: &Row<'_>) -> Result<SyncQueueEntry, rusqlite::Error> {
    let priority: i64 = row.get(1)?;
    let enqueued_at: String = row.get(2)?;
    let status: String = row.get(4)?;
    let not_before: Option<String> = row.get(6)?;

    Ok(SyncQueueEntry {
        record_id: row.get(0)?,
        priority: Priority::new(priority),
        enqueued_at: timestamp::from_db(2, &enqueued_at)?,
        seq: row.get(3)?,
        status: EntryStatus::from_storage(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown queue entry status: {status}").into(),
            )
        })?,
        attempts: row.get(5)?,
        not_before: timestamp::from_db_opt(6, not_before.as_deref())?,
        last_error: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::sync::record::{NewRecord, TriageLevel};
    use crate::features::sync::store::{RecordStore, SqliteRecordStore};

    /// Queue that requeues failed entries without a backoff window.
    fn create_test_queue() -> (SyncQueue, SqliteRecordStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = QueueConfig {
            retry_backoff: Duration::ZERO,
            ..QueueConfig::default()
        };
        (
            SyncQueue::new(Arc::clone(&db), config),
            SqliteRecordStore::new(db),
        )
    }

    fn new_record(triage: TriageLevel) -> MedicalRecord {
        MedicalRecord::create(NewRecord {
            owner_id: Some("user-1".to_string()),
            payload: vec![7; 4],
            triage_level: Some(triage),
            emergency_actions_present: false,
        })
    }

    fn enqueue_with_priority(queue: &SyncQueue, priority: Priority) -> String {
        let mut record = new_record(TriageLevel::Minor);
        record.sync_state.priority = priority;
        queue.enqueue_record(&record).unwrap();
        record.id
    }

    #[test]
    fn test_enqueue_record_is_atomic() {
        let (queue, store) = create_test_queue();
        let record = new_record(TriageLevel::Immediate);

        queue.enqueue_record(&record).unwrap();

        assert!(store.get(&record.id).unwrap().is_some());
        let entry = queue.get(&record.id).unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Queued);
        assert_eq!(entry.priority, Priority::URGENT);
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let (queue, _) = create_test_queue();
        let id = enqueue_with_priority(&queue, Priority::ROUTINE);

        assert!(!queue.enqueue(&id, Priority::ROUTINE).unwrap());
        assert!(!queue.enqueue(&id, Priority::ELEVATED).unwrap());
        // Less urgent value never relaxes the entry
        assert!(!queue.enqueue(&id, Priority::ROUTINE).unwrap());

        let entries = queue.entries(None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].priority, Priority::ELEVATED);
    }

    #[test]
    fn test_enqueue_skips_synced_record() {
        let (queue, store) = create_test_queue();
        let mut record = new_record(TriageLevel::Minor);
        record.sync_state.synced = true;
        store.put(&record).unwrap();

        assert!(!queue.enqueue(&record.id, Priority::URGENT).unwrap());
        assert!(queue.get(&record.id).unwrap().is_none());
    }

    #[test]
    fn test_dequeue_ordering() {
        let (queue, _) = create_test_queue();
        let p3 = enqueue_with_priority(&queue, Priority::ROUTINE);
        let p1_first = enqueue_with_priority(&queue, Priority::URGENT);
        let p2 = enqueue_with_priority(&queue, Priority::ELEVATED);
        let p1_second = enqueue_with_priority(&queue, Priority::URGENT);

        let batch = queue.dequeue_batch(4).unwrap();
        let ids: Vec<_> = batch.iter().map(|e| e.record_id.clone()).collect();

        assert_eq!(ids, vec![p1_first, p1_second, p2, p3]);
        assert!(batch.iter().all(|e| e.status == EntryStatus::InFlight));
    }

    #[test]
    fn test_dequeue_never_returns_claimed_entries() {
        let (queue, _) = create_test_queue();
        for _ in 0..3 {
            enqueue_with_priority(&queue, Priority::ROUTINE);
        }

        let first = queue.dequeue_batch(2).unwrap();
        let second = queue.dequeue_batch(10).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(first.iter().all(|a| second.iter().all(|b| a.record_id != b.record_id)));
        assert!(queue.dequeue_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_success() {
        let (queue, store) = create_test_queue();
        let id = enqueue_with_priority(&queue, Priority::ROUTINE);
        queue.dequeue_batch(1).unwrap();

        assert_eq!(queue.resolve(&id, &ResolveOutcome::Success).unwrap(), Resolution::Synced);

        let record = store.get(&id).unwrap().unwrap();
        assert!(record.sync_state.synced);
        assert_eq!(record.sync_state.attempts, 1);
        assert!(queue.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_resolve_success_twice_is_noop() {
        let (queue, store) = create_test_queue();
        let id = enqueue_with_priority(&queue, Priority::ROUTINE);
        queue.dequeue_batch(1).unwrap();

        queue.resolve(&id, &ResolveOutcome::Success).unwrap();
        let after_first = store.get(&id).unwrap().unwrap();

        assert_eq!(
            queue.resolve(&id, &ResolveOutcome::Success).unwrap(),
            Resolution::AlreadyResolved
        );
        assert_eq!(store.get(&id).unwrap().unwrap(), after_first);
    }

    #[test]
    fn test_retry_escalates_priority_and_caps() {
        let (queue, store) = create_test_queue();
        let id = enqueue_with_priority(&queue, Priority::ROUTINE);
        let failure = ResolveOutcome::RetryableFailure("connection refused".to_string());

        let mut priorities = vec![store.get(&id).unwrap().unwrap().sync_state.priority];

        queue.dequeue_batch(1).unwrap();
        assert!(matches!(
            queue.resolve(&id, &failure).unwrap(),
            Resolution::Requeued { priority: Priority::ELEVATED, attempts: 1, retry_at: None }
        ));
        priorities.push(store.get(&id).unwrap().unwrap().sync_state.priority);

        queue.dequeue_batch(1).unwrap();
        assert!(matches!(
            queue.resolve(&id, &failure).unwrap(),
            Resolution::Requeued { priority: Priority::URGENT, attempts: 2, .. }
        ));
        priorities.push(store.get(&id).unwrap().unwrap().sync_state.priority);

        queue.dequeue_batch(1).unwrap();
        assert_eq!(
            queue.resolve(&id, &failure).unwrap(),
            Resolution::FailedPermanent { attempts: 3 }
        );
        priorities.push(store.get(&id).unwrap().unwrap().sync_state.priority);

        assert!(priorities.windows(2).all(|w| w[1] <= w[0]));

        let entry = queue.get(&id).unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::FailedPermanent);
        assert!(queue.dequeue_batch(10).unwrap().is_empty());

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.sync_state.attempts, 3);
        assert_eq!(record.sync_state.last_error.as_deref(), Some("connection refused"));
        assert!(!record.sync_state.synced);
    }

    #[test]
    fn test_retry_resets_enqueued_at_within_tier() {
        let (queue, _) = create_test_queue();
        let retried = enqueue_with_priority(&queue, Priority::ELEVATED);
        let waiting = enqueue_with_priority(&queue, Priority::URGENT);

        let batch = queue.dequeue_batch(1).unwrap();
        assert_eq!(batch[0].record_id, waiting);
        let batch = queue.dequeue_batch(1).unwrap();
        assert_eq!(batch[0].record_id, retried);

        // waiting goes back first, then retried lands behind it in tier 1
        queue.release(&[waiting.clone()]).unwrap();
        queue
            .resolve(&retried, &ResolveOutcome::RetryableFailure("503".to_string()))
            .unwrap();

        let ids: Vec<_> = queue
            .dequeue_batch(2)
            .unwrap()
            .into_iter()
            .map(|e| e.record_id)
            .collect();
        assert_eq!(ids, vec![waiting, retried]);
    }

    #[test]
    fn test_permanent_failure_is_immediate() {
        let (queue, store) = create_test_queue();
        let id = enqueue_with_priority(&queue, Priority::ROUTINE);
        queue.dequeue_batch(1).unwrap();

        assert_eq!(
            queue
                .resolve(&id, &ResolveOutcome::PermanentFailure("422 invalid".to_string()))
                .unwrap(),
            Resolution::FailedPermanent { attempts: 1 }
        );

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.sync_state.last_error.as_deref(), Some("422 invalid"));
        // Failed entries are not live and do not accept new enqueues
        assert!(!queue.enqueue(&id, Priority::URGENT).unwrap());
        assert_eq!(queue.stats().unwrap().failed_permanent, 1);
    }

    #[test]
    fn test_backoff_holds_entry_until_window_passes() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let queue = SyncQueue::new(
            db,
            QueueConfig {
                max_retries: 3,
                retry_backoff: Duration::from_secs(60),
                max_backoff: Duration::from_secs(300),
            },
        );
        let id = enqueue_with_priority(&queue, Priority::ROUTINE);
        queue.dequeue_batch(1).unwrap();

        let resolution = queue
            .resolve(&id, &ResolveOutcome::RetryableFailure("timeout".to_string()))
            .unwrap();
        assert!(matches!(resolution, Resolution::Requeued { retry_at: Some(_), .. }));
        assert_eq!(queue.get(&id).unwrap().unwrap().status, EntryStatus::Retrying);

        // Timer-style claim respects the window
        assert!(queue.dequeue_batch(10).unwrap().is_empty());

        // Forced claim ignores it
        let forced = queue
            .claim(&ClaimRequest {
                honor_backoff: false,
                ..ClaimRequest::new(10)
            })
            .unwrap();
        assert_eq!(forced.len(), 1);
    }

    #[test]
    fn test_backoff_schedule() {
        let config = QueueConfig {
            max_retries: 10,
            retry_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
        };
        assert_eq!(config.backoff_for(1), Duration::from_secs(5));
        assert_eq!(config.backoff_for(2), Duration::from_secs(10));
        assert_eq!(config.backoff_for(6), Duration::from_secs(160));
        assert_eq!(config.backoff_for(10), Duration::from_secs(300));

        let immediate = QueueConfig {
            retry_backoff: Duration::ZERO,
            ..config
        };
        assert_eq!(immediate.backoff_for(4), Duration::ZERO);
    }

    #[test]
    fn test_default_policy_matches_sync_config() {
        let config = QueueConfig::default();
        assert_eq!(config, QueueConfig::from(&SyncConfig::default()));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_for(1), Duration::from_secs(5));
        assert_eq!(config.max_backoff, Duration::from_secs(300));

        let queue = SyncQueue::with_database(Arc::new(Database::open_in_memory().unwrap()));
        assert_eq!(queue.config(), &config);
    }

    #[test]
    fn test_seq_ceiling_excludes_later_entries() {
        let (queue, _) = create_test_queue();
        let early = enqueue_with_priority(&queue, Priority::ROUTINE);
        let ceiling = queue.current_seq().unwrap();
        enqueue_with_priority(&queue, Priority::URGENT);

        let batch = queue
            .claim(&ClaimRequest {
                seq_ceiling: Some(ceiling),
                ..ClaimRequest::new(10)
            })
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].record_id, early);
    }

    #[test]
    fn test_emergency_escalation() {
        let (queue, store) = create_test_queue();
        let escalated: Vec<_> = (0..5)
            .map(|_| enqueue_with_priority(&queue, Priority::ROUTINE))
            .collect();

        assert_eq!(queue.emergency_escalate_all().unwrap(), 5);
        for id in &escalated {
            assert_eq!(queue.get(id).unwrap().unwrap().priority, Priority::URGENT);
            assert_eq!(
                store.get(id).unwrap().unwrap().sync_state.priority,
                Priority::URGENT
            );
        }

        let late = enqueue_with_priority(&queue, Priority::ROUTINE);
        let batch = queue.dequeue_batch(5).unwrap();
        let ids: Vec<_> = batch.iter().map(|e| e.record_id.clone()).collect();
        assert_eq!(ids, escalated);
        assert!(!ids.contains(&late));
    }

    #[test]
    fn test_recover_in_flight() {
        let (queue, _) = create_test_queue();
        let claimed = enqueue_with_priority(&queue, Priority::ROUTINE);
        let synced = enqueue_with_priority(&queue, Priority::ROUTINE);
        queue.dequeue_batch(2).unwrap();

        // Simulate a crash after the record was marked synced but before the
        // entry was removed
        queue
            .db
            .connection()
            .unwrap()
            .execute("UPDATE medical_records SET synced = 1 WHERE id = ?1", [&synced])
            .unwrap();

        let report = queue.recover_in_flight().unwrap();
        assert_eq!(report, RecoveryReport { requeued: 1, pruned: 1 });
        assert_eq!(queue.get(&claimed).unwrap().unwrap().status, EntryStatus::Queued);
        assert!(queue.get(&synced).unwrap().is_none());
    }

    #[test]
    fn test_retry_failed_rearms_entry() {
        let (queue, store) = create_test_queue();
        let id = enqueue_with_priority(&queue, Priority::ROUTINE);
        queue.dequeue_batch(1).unwrap();
        queue
            .resolve(&id, &ResolveOutcome::PermanentFailure("400".to_string()))
            .unwrap();

        assert!(queue.retry_failed(&id).unwrap());
        assert!(!queue.retry_failed(&id).unwrap());

        let entry = queue.get(&id).unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Queued);
        assert_eq!(entry.attempts, 0);
        // Record history keeps counting
        assert_eq!(store.get(&id).unwrap().unwrap().sync_state.attempts, 1);
    }

    #[test]
    fn test_retry_all_failed() {
        let (queue, _) = create_test_queue();
        for _ in 0..3 {
            let id = enqueue_with_priority(&queue, Priority::ROUTINE);
            queue.dequeue_batch(1).unwrap();
            queue
                .resolve(&id, &ResolveOutcome::PermanentFailure("400".to_string()))
                .unwrap();
        }

        assert_eq!(queue.retry_all_failed().unwrap(), 3);
        assert_eq!(queue.stats().unwrap().queued, 3);
    }

    #[test]
    fn test_stats() {
        let (queue, _) = create_test_queue();
        enqueue_with_priority(&queue, Priority::URGENT);
        enqueue_with_priority(&queue, Priority::ROUTINE);
        let failed = enqueue_with_priority(&queue, Priority::URGENT);
        queue
            .resolve(&failed, &ResolveOutcome::PermanentFailure("400".to_string()))
            .unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.live(), 2);
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.failed_permanent, 1);
        assert_eq!(stats.high_priority, 1);
        assert!(stats.oldest_live.is_some());
    }
}
