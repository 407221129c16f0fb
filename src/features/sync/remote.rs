//! Remote acceptance: the server side that accepts or refuses records.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::entry::ResolveOutcome;
use super::record::MedicalRecord;
use crate::config::RemoteConfig;
use crate::error::SyncError;

/// Answer from the remote store for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Record stored remotely
    Accepted,
    /// Try again later (network trouble, server overload)
    RejectedTransient(String),
    /// Record refused; resubmitting it unchanged will not help
    RejectedPermanent(String),
}

impl RemoteOutcome {
    /// Queue outcome for this answer.
    #[must_use]
    pub fn into_resolve_outcome(self) -> ResolveOutcome {
        match self {
            Self::Accepted => ResolveOutcome::Success,
            Self::RejectedTransient(reason) => ResolveOutcome::RetryableFailure(reason),
            Self::RejectedPermanent(reason) => ResolveOutcome::PermanentFailure(reason),
        }
    }
}

/// Submits a record to the remote store.
///
/// Submission must be idempotent on the remote side: after a crash a record
/// may be submitted again even though the earlier attempt was accepted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteAcceptance: Send + Sync {
    /// Submit one record.
    async fn submit(&self, record: &MedicalRecord) -> RemoteOutcome;
}

/// [`RemoteAcceptance`] over HTTP: the record is POSTed as JSON.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemote {
    /// Build a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &RemoteConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    /// Endpoint records are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteAcceptance for HttpRemote {
    async fn submit(&self, record: &MedicalRecord) -> RemoteOutcome {
        match self.client.post(&self.endpoint).json(record).send().await {
            Ok(resp) => {
                let status = resp.status();
                debug!(record_id = %record.id, %status, "remote responded");
                classify_status(status)
            },
            Err(e) => RemoteOutcome::RejectedTransient(format!("request failed: {e}")),
        }
    }
}

/// Map an HTTP status to a delivery outcome.
///
/// Client errors are permanent except for timeouts and rate limiting, which
/// say nothing about the record itself.
#[must_use]
pub fn classify_status(status: StatusCode) -> RemoteOutcome {
    if status.is_success() {
        RemoteOutcome::Accepted
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        RemoteOutcome::RejectedTransient(format!("HTTP {status}"))
    } else if status.is_client_error() {
        RemoteOutcome::RejectedPermanent(format!("HTTP {status}"))
    } else {
        RemoteOutcome::RejectedTransient(format!("HTTP {status}"))
    }
}
