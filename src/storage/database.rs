//! `SQLite` database connection and operations.
//!
//! The database is stored at `~/.medsync/medsync.db` and contains tables for:
//! - Medical records and their sync state
//! - The sync queue
//!
//! One connection is shared per process behind a mutex, so every write goes
//! through a single writer. Multi-row changes run inside [`Database::transaction`].

use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::config::Paths;
use crate::error::SyncError;

use super::migrations;

/// Database connection wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at the default location.
    ///
    /// Creates the database file and runs migrations if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open() -> Result<Self, SyncError> {
        let paths = Paths::new()?;
        paths.ensure_dirs()?;
        Self::open_at(&paths.database)
    }

    /// Open the database at a specific path.
    ///
    /// Creates the database file and runs migrations if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_at(path: &std::path::Path) -> Result<Self, SyncError> {
        let conn = Connection::open(path).map_err(|e| {
            SyncError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;

        // Records must survive a crash right after a write returns
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| SyncError::Database(format!("Failed to enable WAL journal: {e}")))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|e| SyncError::Database(format!("Failed to set synchronous mode: {e}")))?;

        Self::from_connection(conn)
    }

    /// Open an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SyncError::Database(format!("Failed to open in-memory database: {e}"))
        })?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| SyncError::Database(format!("Failed to enable foreign keys: {e}")))?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, SyncError> {
        migrations::get_version(&*self.connection()?)
    }

    /// Lock and return the underlying connection.
    ///
    /// The guard must not be held across an `.await`.
    ///
    /// # Errors
    ///
    /// Returns an error if a previous holder panicked while holding the lock.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Database("Database connection lock poisoned".to_string()))
    }

    /// Run `f` inside an immediate transaction, committing only if it succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a database error if the transaction
    /// cannot be started or committed.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, SyncError>,
    {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| SyncError::Database(format!("Failed to begin transaction: {e}")))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| SyncError::Database(format!("Failed to commit transaction: {e}")))?;
        Ok(value)
    }
}
