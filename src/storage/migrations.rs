//! Database migrations for medsync.
//!
//! Each migration is a function that upgrades the schema by one version.
//! Migrations are run automatically when the database is opened.

use rusqlite::Connection;

use crate::error::SyncError;

/// Current schema version.
const CURRENT_VERSION: i32 = 1;

/// Get the current schema version from the database.
///
/// Returns 0 if no version has been set (new database).
pub fn get_version(conn: &Connection) -> Result<i32, SyncError> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| SyncError::Database(format!("Failed to get schema version: {e}")))?;

    Ok(version)
}

/// Set the schema version in the database.
fn set_version(conn: &Connection, version: i32) -> Result<(), SyncError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| SyncError::Database(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<(), SyncError> {
    let current = get_version(conn)?;

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: i32) -> Result<(), SyncError> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(SyncError::Database(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// Creates tables for:
/// - `medical_records`: locally created records plus sync state
/// - `sync_queue`: one row per record awaiting (or refused) delivery
///
/// `sync_queue.record_id` is not a foreign key. An entry whose record is
/// missing is resolved as an orphan by the delivery driver.
fn migrate_v1(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS medical_records (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            payload BLOB NOT NULL,
            triage_level TEXT,
            emergency_actions INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TEXT,
            last_error TEXT,
            priority INTEGER NOT NULL DEFAULT 3
        );

        CREATE INDEX IF NOT EXISTS idx_medical_records_owner
        ON medical_records(owner_id);

        CREATE INDEX IF NOT EXISTS idx_medical_records_synced
        ON medical_records(synced);

        CREATE INDEX IF NOT EXISTS idx_medical_records_triage
        ON medical_records(triage_level);

        CREATE TABLE IF NOT EXISTS sync_queue (
            record_id TEXT PRIMARY KEY,
            priority INTEGER NOT NULL,
            enqueued_at TEXT NOT NULL,
            seq INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued'
                CHECK (status IN ('queued', 'in_flight', 'retrying', 'failed_permanent')),
            attempts INTEGER NOT NULL DEFAULT 0,
            not_before TEXT,
            last_error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_queue_order
        ON sync_queue(status, priority, enqueued_at, seq);

        -- Monotonic enqueue counter; survives entry deletion
        CREATE TABLE IF NOT EXISTS sync_sequence (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            value INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO sync_sequence (id, value) VALUES (1, 0);
        ",
    )
    .map_err(|e| SyncError::Database(format!("Migration v1 failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_v1() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);

        conn.execute(
            "INSERT INTO medical_records (id, owner_id, payload, triage_level, created_at, updated_at)
             VALUES ('r1', 'user-1', x'00ff', 'immediate', '2024-01-01T10:00:00.000000Z', '2024-01-01T10:00:00.000000Z')",
            [],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO sync_queue (record_id, priority, enqueued_at, seq)
             VALUES ('r1', 1, '2024-01-01T10:00:00.000000Z', 1)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_one_queue_row_per_record() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        let insert = "INSERT INTO sync_queue (record_id, priority, enqueued_at, seq)
                      VALUES ('r1', 1, '2024-01-01T10:00:00.000000Z', 1)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_queue_status_is_constrained() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        let insert = "INSERT INTO sync_queue (record_id, priority, enqueued_at, seq, status)
                      VALUES (?1, 1, '2024-01-01T10:00:00.000000Z', 1, ?2)";
        conn.execute(insert, ["r1", "failed_permanent"]).unwrap();
        assert!(conn.execute(insert, ["r2", "failed"]).is_err());
        assert!(conn
            .execute("UPDATE sync_queue SET status = 'lost' WHERE record_id = 'r1'", [])
            .is_err());
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();
        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_get_version_new_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_version(&conn).unwrap(), 0);
    }
}
