//! Medical record types and their sync state.
//!
//! The payload is an opaque (already encrypted) blob; nothing in the sync
//! engine inspects it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::priority::{classify, Priority};
use crate::error::SyncError;
use crate::storage::timestamp;

/// Owner recorded for records created without an authenticated subject.
pub const ANONYMOUS_EMERGENCY_OWNER: &str = "anonymous-emergency";

/// Locally unique record identifier.
pub type RecordId = String;

/// Clinical urgency classification, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageLevel {
    /// Life-threatening, treat now
    Immediate,
    /// Serious but can wait
    Delayed,
    /// Walking wounded
    Minor,
    /// Unlikely to survive given available care
    Expectant,
}

impl TriageLevel {
    /// Storage and CLI name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Delayed => "delayed",
            Self::Minor => "minor",
            Self::Expectant => "expectant",
        }
    }

    /// Lenient parse; unknown values yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "immediate" | "red" => Some(Self::Immediate),
            "delayed" | "yellow" => Some(Self::Delayed),
            "minor" | "green" => Some(Self::Minor),
            "expectant" | "black" => Some(Self::Expectant),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TriageLevel {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| SyncError::InvalidInput(format!("unknown triage level: {s}")))
    }
}

/// Delivery bookkeeping carried on each record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Whether the remote store has accepted the record
    pub synced: bool,
    /// Delivery attempts so far; never decreases
    pub attempts: u32,
    /// When the last attempt finished
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Last delivery error
    pub last_error: Option<String>,
    /// Current delivery priority; only ever becomes more urgent
    pub priority: Priority,
}

impl SyncState {
    /// Fresh state for a record that has never been delivered.
    #[must_use]
    pub const fn new(priority: Priority) -> Self {
        Self {
            synced: false,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            priority,
        }
    }
}

/// A locally created medical record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalRecord {
    /// Immutable identifier assigned at creation
    pub id: RecordId,
    /// Subject id, or [`ANONYMOUS_EMERGENCY_OWNER`]
    pub owner_id: String,
    /// Opaque encrypted payload
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    /// Triage level from the analysis step, if any
    pub triage_level: Option<TriageLevel>,
    /// Whether the analysis recommended emergency actions
    pub emergency_actions_present: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change to the sync state
    pub updated_at: DateTime<Utc>,
    /// Delivery bookkeeping
    pub sync_state: SyncState,
}

/// Input for creating a record.
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    /// Authenticated subject, `None` for anonymous emergency capture
    pub owner_id: Option<String>,
    /// Encrypted payload
    pub payload: Vec<u8>,
    /// Triage level from analysis
    pub triage_level: Option<TriageLevel>,
    /// Whether emergency actions were recommended
    pub emergency_actions_present: bool,
}

impl MedicalRecord {
    /// Build a new unsynced record with a fresh id and classified priority.
    #[must_use]
    pub fn create(new: NewRecord) -> Self {
        let now = timestamp::now();
        let priority = classify(new.triage_level, new.emergency_actions_present);

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: new
                .owner_id
                .filter(|o| !o.trim().is_empty())
                .unwrap_or_else(|| ANONYMOUS_EMERGENCY_OWNER.to_string()),
            payload: new.payload,
            triage_level: new.triage_level,
            emergency_actions_present: new.emergency_actions_present,
            created_at: now,
            updated_at: now,
            sync_state: SyncState::new(priority),
        }
    }

    /// Whether the record was captured without an authenticated owner.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.owner_id == ANONYMOUS_EMERGENCY_OWNER
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
