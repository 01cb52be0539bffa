//! Identifier allocation.

use crate::sequence::{SequenceError, SequenceSource};
use docid_core::{DocumentIdentifier, IdentifierError};
use std::sync::Arc;

/// Turns one fresh counter value into a [`DocumentIdentifier`].
#[derive(Clone)]
pub struct SequenceAllocator {
    source: Arc<dyn SequenceSource>,
}

impl SequenceAllocator {
    /// Create an allocator drawing from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn SequenceSource>) -> Self {
        Self { source }
    }

    /// Acquire a counter value and encode it.
    ///
    /// The value is consumed even when it turns out to be over the ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::SequenceExhausted`] if the counter is past
    /// the largest encodable value, or the counter's own error.
    pub async fn allocate(&self) -> Result<DocumentIdentifier, AllocationError> {
        let value = self.source.next_value().await?;

        match DocumentIdentifier::from_sequence(value) {
            Ok(identifier) => {
                tracing::debug!(value, identifier = %identifier, "Identifier allocated");
                Ok(identifier)
            }
            Err(IdentifierError::SequenceExhausted { value, max }) => {
                tracing::error!(value, max, "Identifier sequence exhausted");
                Err(AllocationError::SequenceExhausted { value, max })
            }
            Err(err) => Err(AllocationError::Identifier(err)),
        }
    }
}

/// Errors from identifier allocation.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// Counter could not be read
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    /// Counter value is past the ceiling
    #[error("identifier sequence exceeded maximum {max}")]
    SequenceExhausted {
        /// Value that was acquired and spent
        value: u64,
        /// Ceiling
        max: u64,
    },
    /// Value could not be encoded
    #[error(transparent)]
    Identifier(IdentifierError),
}
