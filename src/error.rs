//! Error types for medsync.

use thiserror::Error;

/// Errors surfaced by the storage layer, the sync engine and the CLI.
///
/// Delivery failures against the remote store are not errors: they are
/// recorded as per-record outcomes and only show up in pass summaries.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local database failed or is inaccessible.
    #[error("database error: {0}")]
    Database(String),

    /// Configuration could not be read, parsed or written.
    #[error("configuration error: {0}")]
    Config(String),

    /// A requested record or queue entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied an invalid value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The delivery driver was stopped and accepts no new passes.
    #[error("delivery driver is stopped")]
    DriverStopped,

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failure.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::NotFound("record abc".to_string());
        assert_eq!(err.to_string(), "not found: record abc");

        assert_eq!(
            SyncError::DriverStopped.to_string(),
            "delivery driver is stopped"
        );
    }

    #[test]
    fn test_from_rusqlite() {
        let err: SyncError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, SyncError::Database(_)));
    }
}
