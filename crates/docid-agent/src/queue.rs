//! Propagation queues.
//!
//! Enqueueing never fails loudly: a queue answers with [`QueueAcceptance`]
//! and the caller logs a rejection and moves on. Delivery is at-least-once
//! with no ordering between messages.

use crate::persistence::SqliteStore;
use async_trait::async_trait;
use docid_proto::PropagationMessage;
use std::sync::Arc;
use uuid::Uuid;

/// Answer of a queue to one enqueue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAcceptance {
    /// Message stored or handed to the broker
    Accepted {
        /// Id assigned to the message
        message_id: String,
    },
    /// Message refused
    Rejected {
        /// Why the queue refused it
        error: String,
    },
}

impl QueueAcceptance {
    /// Whether the message was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Destination for propagation messages.
#[async_trait]
pub trait PropagationQueue: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Offer one message to the queue.
    async fn enqueue(&self, message: &PropagationMessage) -> QueueAcceptance;
}

/// Durable queue stored in the agent database.
pub struct SqliteQueue {
    store: Arc<SqliteStore>,
    name: String,
}

impl SqliteQueue {
    /// Create a queue named `name` in `store`.
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }
}

#[async_trait]
impl PropagationQueue for SqliteQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, message: &PropagationMessage) -> QueueAcceptance {
        let message_id = Uuid::new_v4().to_string();
        match self.store.enqueue(&self.name, &message_id, message) {
            Ok(()) => QueueAcceptance::Accepted { message_id },
            Err(err) => QueueAcceptance::Rejected {
                error: err.to_string(),
            },
        }
    }
}
