//! Timestamp encoding for database columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with microsecond
//! precision, so ordering by the text column orders chronologically.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;

/// Current time at storage precision.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Encode a timestamp for storage.
#[must_use]
pub fn to_db(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a required timestamp column.
///
/// # Errors
///
/// Returns a conversion error naming the column index if the text is not RFC 3339.
pub fn from_db(idx: usize, s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode an optional timestamp column.
///
/// # Errors
///
/// Returns a conversion error if the column is present but malformed.
pub fn from_db_opt(idx: usize, s: Option<&str>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    s.map(|s| from_db(idx, s)).transpose()
}
