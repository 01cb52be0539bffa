//! Counter sources for identifier allocation.
//!
//! A source hands out integers that were never handed out before. It owns
//! the uniqueness guarantee; nothing upstream caches or increments values.

use crate::persistence::{SqliteStore, StoreError};
use async_trait::async_trait;
use docid_adapter_vault::{ClientError, VaultClient};
use std::sync::Arc;

/// A shared monotonic counter.
#[async_trait]
pub trait SequenceSource: Send + Sync {
    /// Acquire one fresh value. Each call permanently consumes a value.
    async fn next_value(&self) -> Result<u64, SequenceError>;
}

/// Counter backed by the local `AUTOINCREMENT` table.
pub struct SqliteSequence {
    store: Arc<SqliteStore>,
}

impl SqliteSequence {
    /// Create a source over `store`.
    #[must_use]
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SequenceSource for SqliteSequence {
    async fn next_value(&self) -> Result<u64, SequenceError> {
        Ok(self.store.next_sequence_value()?)
    }
}

/// Counter backed by an autonumber object on the remote server.
///
/// Acquiring a value creates one record of the object and reads back the
/// decimal name the server generated for it.
pub struct AutonumberSequence {
    client: Arc<VaultClient>,
    object: String,
}

impl AutonumberSequence {
    /// Create a source that mints records of `object`.
    #[must_use]
    pub fn new(client: Arc<VaultClient>, object: impl Into<String>) -> Self {
        Self {
            client,
            object: object.into(),
        }
    }
}

#[async_trait]
impl SequenceSource for AutonumberSequence {
    async fn next_value(&self) -> Result<u64, SequenceError> {
        let record_id = self.client.create_object_record(&self.object).await?;
        let name = self
            .client
            .object_record_name(&self.object, &record_id)
            .await?
            .ok_or_else(|| SequenceError::MissingName {
                record_id: record_id.clone(),
            })?;

        tracing::debug!(object = %self.object, record_id, name, "Autonumber record created");

        name.trim()
            .parse()
            .map_err(|_| SequenceError::InvalidName { record_id, name })
    }
}

/// Errors acquiring a counter value.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    /// Local counter failure
    #[error("counter store error: {0}")]
    Store(#[from] StoreError),
    /// Remote counter failure
    #[error("counter request failed: {0}")]
    Remote(#[from] ClientError),
    /// The generated record has no name
    #[error("autonumber record {record_id} has no generated name")]
    MissingName {
        /// Created record
        record_id: String,
    },
    /// The generated name is not a decimal number
    #[error("autonumber record {record_id} has non-numeric name {name:?}")]
    InvalidName {
        /// Created record
        record_id: String,
        /// Generated name
        name: String,
    },
}
