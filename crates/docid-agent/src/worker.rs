//! Version update worker.
//!
//! The worker trusts its message: it does not re-check whether the version
//! already carries an identifier. Re-delivery of a message simply writes the
//! same value again.

use crate::persistence::{now_ms, QueuedMessage, SqliteStore, StoreError};
use crate::remote::ConnectionRegistry;
use docid_adapter_vault::{FieldNames, FieldUpdate};
use docid_core::PropagationState;
use docid_proto::PropagationMessage;
use std::sync::Arc;
use std::time::Duration;

/// Largest backoff exponent; later attempts wait no longer than this.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Outcome of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    /// Remote store acknowledged the update
    Succeeded,
    /// Update did not happen
    Failed {
        /// Extracted failure message
        reason: String,
    },
}

impl UpdateResult {
    /// Whether the update succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Applies one propagation message to its document version.
#[derive(Clone)]
pub struct VersionUpdateWorker {
    connections: ConnectionRegistry,
    fields: FieldNames,
}

impl VersionUpdateWorker {
    /// Create a worker writing `fields` through `connections`.
    #[must_use]
    pub fn new(connections: ConnectionRegistry, fields: FieldNames) -> Self {
        Self {
            connections,
            fields,
        }
    }

    /// Set the identifier and export filename of the message's version.
    pub async fn process(&self, message: &PropagationMessage) -> UpdateResult {
        let label = message.label();

        let Some(updater) = self.connections.resolve(&message.api_connection) else {
            let reason = format!(
                "unknown connection '{}' (configured: {})",
                message.api_connection,
                self.connections.names().join(", ")
            );
            tracing::error!(label, connection = %message.api_connection, "{reason}");
            return UpdateResult::Failed { reason };
        };

        let update = FieldUpdate::new(&self.fields, &message.identifier);
        match updater
            .update_fields(&message.doc_id, message.version, &update)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    label,
                    identifier = %message.identifier,
                    "Document version updated"
                );
                UpdateResult::Succeeded
            }
            Err(err) => {
                tracing::error!(
                    label,
                    error = %err,
                    error_type = err.error_type().unwrap_or("-"),
                    "Document version update failed"
                );
                UpdateResult::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Retry schedule for failed updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before a message is dead-lettered (at least 1)
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles per attempt
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` failed ones, or
    /// `None` when the message should be dead-lettered.
    #[must_use]
    pub fn delay_after(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        let exponent = attempts.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        Some(self.base_backoff.saturating_mul(1 << exponent))
    }
}

/// Totals of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Updates that succeeded
    pub succeeded: usize,
    /// Updates scheduled for another attempt
    pub retried: usize,
    /// Updates out of attempts
    pub dead_lettered: usize,
}

impl DrainSummary {
    /// Messages processed.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.succeeded + self.retried + self.dead_lettered
    }
}

/// Consumes the `SQLite` queue and records each outcome.
pub struct QueueDrainer {
    store: Arc<SqliteStore>,
    queue_name: String,
    worker: VersionUpdateWorker,
    retry: RetryPolicy,
}

impl QueueDrainer {
    /// Create a drainer for `queue_name`.
    #[must_use]
    pub fn new(
        store: Arc<SqliteStore>,
        queue_name: impl Into<String>,
        worker: VersionUpdateWorker,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            queue_name: queue_name.into(),
            worker,
            retry,
        }
    }

    /// Process the next ready message, if any, and return its new state.
    ///
    /// # Errors
    ///
    /// Returns error if the queue cannot be read or updated.
    pub async fn drain_one(&self) -> Result<Option<PropagationState>, StoreError> {
        let Some(claimed) = self.store.claim_next(&self.queue_name)? else {
            return Ok(None);
        };

        let result = self.worker.process(&claimed.message).await;
        self.record(&claimed, &result).map(Some)
    }

    /// Process ready messages until none are left.
    ///
    /// # Errors
    ///
    /// Returns error if the queue cannot be read or updated.
    pub async fn drain(&self) -> Result<DrainSummary, StoreError> {
        let mut summary = DrainSummary::default();
        while let Some(state) = self.drain_one().await? {
            match state {
                PropagationState::Succeeded => summary.succeeded += 1,
                PropagationState::DeadLettered => summary.dead_lettered += 1,
                PropagationState::Pending | PropagationState::InFlight => summary.retried += 1,
            }
        }
        Ok(summary)
    }

    fn record(
        &self,
        claimed: &QueuedMessage,
        result: &UpdateResult,
    ) -> Result<PropagationState, StoreError> {
        let reason = match result {
            UpdateResult::Succeeded => {
                self.store.mark_succeeded(claimed.id)?;
                return Ok(PropagationState::Succeeded);
            }
            UpdateResult::Failed { reason } => reason,
        };

        let retry_at = self.retry.delay_after(claimed.attempts).map(|delay| {
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            now_ms().saturating_add(delay_ms)
        });

        let state = self.store.mark_failed(claimed.id, reason, retry_at)?;
        if state == PropagationState::DeadLettered {
            tracing::warn!(
                message_id = %claimed.message_id,
                label = %claimed.message.label(),
                attempts = claimed.attempts,
                "Update dead-lettered"
            );
        } else {
            tracing::info!(
                message_id = %claimed.message_id,
                label = %claimed.message.label(),
                attempts = claimed.attempts,
                "Update scheduled for retry"
            );
        }
        Ok(state)
    }
}
