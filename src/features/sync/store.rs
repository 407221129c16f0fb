//! Record store: durable keyed storage for medical records.
//!
//! [`RecordStore`] is the interface the delivery driver consumes;
//! [`SqliteRecordStore`] is the local implementation sharing the database
//! with the sync queue.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::priority::Priority;
use super::record::{MedicalRecord, SyncState, TriageLevel};
use crate::error::SyncError;
use crate::storage::{timestamp, Database};

/// Indexed fields records can be queried by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIndex {
    /// Records belonging to one owner
    Owner(String),
    /// Synced or unsynced records
    Synced(bool),
    /// Records with a given triage level
    Triage(TriageLevel),
    /// Records at a given delivery priority
    Priority(Priority),
}

/// Durable record storage. Every method is durable on return.
pub trait RecordStore: Send + Sync {
    /// Load a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is inaccessible.
    fn get(&self, id: &str) -> Result<Option<MedicalRecord>, SyncError>;

    /// Insert a record, or merge its sync state into the stored copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is inaccessible.
    fn put(&self, record: &MedicalRecord) -> Result<(), SyncError>;

    /// Load every record matching an index value, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is inaccessible.
    fn query_by_index(&self, index: &RecordIndex) -> Result<Vec<MedicalRecord>, SyncError>;
}

/// [`RecordStore`] backed by the local `SQLite` database.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<Database>,
}

impl SqliteRecordStore {
    /// Create a store over a shared database.
    #[must_use]
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, id: &str) -> Result<Option<MedicalRecord>, SyncError> {
        get_record(&*self.db.connection()?, id)
    }

    fn put(&self, record: &MedicalRecord) -> Result<(), SyncError> {
        self.db.transaction(|tx| put_record(tx, record))
    }

    fn query_by_index(&self, index: &RecordIndex) -> Result<Vec<MedicalRecord>, SyncError> {
        let conn = self.db.connection()?;

        let (column, value): (&str, Box<dyn rusqlite::ToSql>) = match index {
            RecordIndex::Owner(owner) => ("owner_id", Box::new(owner.clone())),
            RecordIndex::Synced(synced) => ("synced", Box::new(*synced)),
            RecordIndex::Triage(level) => ("triage_level", Box::new(level.as_str())),
            RecordIndex::Priority(p) => ("priority", Box::new(p.value())),
        };

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM medical_records
                 WHERE {column} = ?1
                 ORDER BY created_at ASC, id ASC"
            ))
            .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([value], row_to_record)
            .map_err(|e| SyncError::Database(format!("Failed to query records: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| SyncError::Database(e.to_string()))?);
        }
        Ok(records)
    }
}

const RECORD_COLUMNS: &str = "id, owner_id, payload, triage_level, emergency_actions,
    created_at, updated_at, synced, attempts, last_attempt_at, last_error, priority";

/// Load a record on an open connection or transaction.
pub(crate) fn get_record(conn: &Connection, id: &str) -> Result<Option<MedicalRecord>, SyncError> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM medical_records WHERE id = ?1"),
        [id],
        row_to_record,
    )
    .optional()
    .map_err(|e| SyncError::Database(format!("Failed to load record {id}: {e}")))
}

/// Upsert a record on an open connection or transaction.
///
/// On conflict the immutable fields are kept and the sync state is merged
/// monotonically: `synced` never flips back, `attempts` never drops and the
/// priority never becomes less urgent. Once the stored copy is synced its
/// queue entry, if any, is removed in the same call.
pub(crate) fn put_record(conn: &Connection, record: &MedicalRecord) -> Result<(), SyncError> {
    let state = &record.sync_state;

    conn.execute(
        r"INSERT INTO medical_records (id, owner_id, payload, triage_level, emergency_actions,
                                       created_at, updated_at, synced, attempts,
                                       last_attempt_at, last_error, priority)
          VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
          ON CONFLICT(id) DO UPDATE SET
              synced = MAX(synced, excluded.synced),
              last_attempt_at = CASE WHEN excluded.attempts > attempts
                                     THEN excluded.last_attempt_at ELSE last_attempt_at END,
              last_error = CASE WHEN excluded.attempts > attempts
                                THEN excluded.last_error ELSE last_error END,
              attempts = MAX(attempts, excluded.attempts),
              priority = MIN(priority, excluded.priority),
              updated_at = MAX(updated_at, excluded.updated_at)",
        params![
            record.id,
            record.owner_id,
            record.payload,
            record.triage_level.map(|t| t.as_str()),
            record.emergency_actions_present,
            timestamp::to_db(record.created_at),
            timestamp::to_db(record.updated_at),
            state.synced,
            state.attempts,
            state.last_attempt_at.map(timestamp::to_db),
            state.last_error,
            state.priority.value(),
        ],
    )
    .map_err(|e| SyncError::Database(format!("Failed to store record {}: {e}", record.id)))?;

    conn.execute(
        "DELETE FROM sync_queue WHERE record_id = ?1
           AND EXISTS (SELECT 1 FROM medical_records WHERE id = ?1 AND synced = 1)",
        [&record.id],
    )
    .map_err(|e| SyncError::Database(format!("Failed to drop entry for {}: {e}", record.id)))?;

    Ok(())
}

fn row_to_record(row: &Row<'_>) -> Result<MedicalRecord, rusqlite::Error> {
    let triage: Option<String> = row.get(3)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    let last_attempt_at: Option<String> = row.get(9)?;
    let priority: i64 = row.get(11)?;

    Ok(MedicalRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        payload: row.get(2)?,
        triage_level: triage.as_deref().and_then(TriageLevel::parse),
        emergency_actions_present: row.get(4)?,
        created_at: timestamp::from_db(5, &created_at)?,
        updated_at: timestamp::from_db(6, &updated_at)?,
        sync_state: SyncState {
            synced: row.get(7)?,
            attempts: row.get(8)?,
            last_attempt_at: timestamp::from_db_opt(9, last_attempt_at.as_deref())?,
            last_error: row.get(10)?,
            priority: Priority::new(priority),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::sync::record::NewRecord;

    fn create_test_store() -> SqliteRecordStore {
        SqliteRecordStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn record(owner: &str, triage: TriageLevel) -> MedicalRecord {
        MedicalRecord::create(NewRecord {
            owner_id: Some(owner.to_string()),
            payload: vec![0xde, 0xad],
            triage_level: Some(triage),
            emergency_actions_present: false,
        })
    }

    #[test]
    fn test_put_and_get() {
        let store = create_test_store();
        let rec = record("user-1", TriageLevel::Delayed);

        store.put(&rec).unwrap();

        let loaded = store.get(&rec.id).unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_query_by_index() {
        let store = create_test_store();
        let a = record("user-1", TriageLevel::Immediate);
        let b = record("user-1", TriageLevel::Minor);
        let c = record("user-2", TriageLevel::Minor);
        for r in [&a, &b, &c] {
            store.put(r).unwrap();
        }

        let owned = store.query_by_index(&RecordIndex::Owner("user-1".to_string())).unwrap();
        assert_eq!(owned.len(), 2);

        let minor = store.query_by_index(&RecordIndex::Triage(TriageLevel::Minor)).unwrap();
        assert_eq!(minor.len(), 2);

        let urgent = store.query_by_index(&RecordIndex::Priority(Priority::URGENT)).unwrap();
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0].id, a.id);

        let unsynced = store.query_by_index(&RecordIndex::Synced(false)).unwrap();
        assert_eq!(unsynced.len(), 3);
    }

    #[test]
    fn test_put_never_relaxes_sync_state() {
        let store = create_test_store();
        let mut rec = record("user-1", TriageLevel::Minor);
        rec.sync_state.attempts = 2;
        rec.sync_state.priority = Priority::ELEVATED;
        rec.sync_state.synced = true;
        store.put(&rec).unwrap();

        // Stale copy written back
        let mut stale = rec.clone();
        stale.sync_state.attempts = 1;
        stale.sync_state.priority = Priority::ROUTINE;
        stale.sync_state.synced = false;
        stale.sync_state.last_error = Some("stale".to_string());
        store.put(&stale).unwrap();

        let loaded = store.get(&rec.id).unwrap().unwrap();
        assert!(loaded.sync_state.synced);
        assert_eq!(loaded.sync_state.attempts, 2);
        assert_eq!(loaded.sync_state.priority, Priority::ELEVATED);
        assert_eq!(loaded.sync_state.last_error, None);
    }

    #[test]
    fn test_put_synced_drops_queue_entry() {
        use crate::features::sync::queue::SyncQueue;

        let db = Arc::new(Database::open_in_memory().unwrap());
        let queue = SyncQueue::with_database(Arc::clone(&db));
        let store = SqliteRecordStore::new(db);
        let mut rec = record("user-1", TriageLevel::Delayed);
        queue.enqueue_record(&rec).unwrap();
        assert!(queue.get(&rec.id).unwrap().is_some());

        // Unsynced writes leave the entry alone
        store.put(&rec).unwrap();
        assert!(queue.get(&rec.id).unwrap().is_some());

        rec.sync_state.synced = true;
        store.put(&rec).unwrap();

        assert!(store.get(&rec.id).unwrap().unwrap().sync_state.synced);
        assert!(queue.get(&rec.id).unwrap().is_none());
        assert_eq!(queue.stats().unwrap().live(), 0);
    }

    #[test]
    fn test_missing_triage_round_trips_as_none() {
        let store = create_test_store();
        let rec = MedicalRecord::create(NewRecord::default());
        store.put(&rec).unwrap();

        let loaded = store.get(&rec.id).unwrap().unwrap();
        assert_eq!(loaded.triage_level, None);
        assert_eq!(loaded.sync_state.priority, Priority::ROUTINE);
    }
}
