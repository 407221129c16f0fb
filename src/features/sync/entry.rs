//! Sync queue entries and resolution outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::priority::Priority;
use super::record::RecordId;

/// Status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting to be claimed
    Queued,
    /// Claimed by the current delivery batch
    InFlight,
    /// Failed transiently, waiting out its backoff window
    Retrying,
    /// Excluded from automatic delivery
    FailedPermanent,
}

impl EntryStatus {
    /// Storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::Retrying => "retrying",
            Self::FailedPermanent => "failed_permanent",
        }
    }

    /// Parse a status name, accepting `-` or `_` separators and `failed`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "queued" => Some(Self::Queued),
            "in_flight" | "inflight" => Some(Self::InFlight),
            "retrying" => Some(Self::Retrying),
            "failed_permanent" | "failed" => Some(Self::FailedPermanent),
            _ => None,
        }
    }

    /// Exact storage name lookup. Unknown names are rejected rather than
    /// guessed, so a damaged row never re-enters delivery.
    #[must_use]
    pub fn from_storage(s: &str) -> Option<Self> {
        [Self::Queued, Self::InFlight, Self::Retrying, Self::FailedPermanent]
            .into_iter()
            .find(|status| status.as_str() == s)
    }

    /// Whether the entry still takes part in automatic delivery.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::FailedPermanent)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reference to an undelivered record, ordered by `(priority, enqueued_at, seq)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Record this entry refers to
    pub record_id: RecordId,
    /// Current priority
    pub priority: Priority,
    /// When the entry (re-)entered its priority tier
    pub enqueued_at: DateTime<Utc>,
    /// Insertion counter, final tie-breaker
    pub seq: i64,
    /// Current status
    pub status: EntryStatus,
    /// Failed attempts since this entry was (re-)armed
    pub attempts: u32,
    /// Earliest time a retrying entry may be claimed by a timer pass
    pub not_before: Option<DateTime<Utc>>,
    /// Last failure reason
    pub last_error: Option<String>,
}

/// Outcome of one delivery attempt, as reported to [`super::SyncQueue::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Remote accepted the record
    Success,
    /// Transient failure; retried until the retry budget runs out
    RetryableFailure(String),
    /// Remote refused the record; never retried automatically
    PermanentFailure(String),
}

impl ResolveOutcome {
    /// Failure reason, if this is a failure.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::RetryableFailure(reason) | Self::PermanentFailure(reason) => Some(reason),
        }
    }
}

/// What `resolve` did to the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Resolution {
    /// Entry removed and record marked synced
    Synced,
    /// Entry re-armed at a (possibly) more urgent priority
    Requeued {
        /// Priority after escalation
        priority: Priority,
        /// Failed attempts so far
        attempts: u32,
        /// End of the backoff window, if any
        retry_at: Option<DateTime<Utc>>,
    },
    /// Entry excluded from automatic delivery
    FailedPermanent {
        /// Failed attempts so far
        attempts: u32,
    },
    /// No live entry existed; nothing was written
    AlreadyResolved,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            EntryStatus::Queued,
            EntryStatus::InFlight,
            EntryStatus::Retrying,
            EntryStatus::FailedPermanent,
        ] {
            assert_eq!(EntryStatus::from_storage(status.as_str()), Some(status));
        }
        assert_eq!(EntryStatus::from_storage("failed"), None);
        assert_eq!(EntryStatus::from_storage("garbage"), None);
        assert_eq!(EntryStatus::parse("In-Flight"), Some(EntryStatus::InFlight));
        assert_eq!(EntryStatus::parse("failed"), Some(EntryStatus::FailedPermanent));
        assert_eq!(EntryStatus::parse("garbage"), None);
    }

    #[test]
    fn test_status_live() {
        assert!(EntryStatus::Queued.is_live());
        assert!(EntryStatus::InFlight.is_live());
        assert!(EntryStatus::Retrying.is_live());
        assert!(!EntryStatus::FailedPermanent.is_live());
    }
}
