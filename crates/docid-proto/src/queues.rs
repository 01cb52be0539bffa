//! Queue naming scheme.
//!
//! Topic structure: `docid/v1/{tenant}/queue/{queue_name}[/dead]`
//!
//! The work channel carries propagation messages; the dead-letter channel
//! receives messages whose update failed so they can be inspected.

use serde::{Deserialize, Serialize};

/// Protocol version for the topic scheme.
pub const PROTOCOL_VERSION: &str = "v1";

/// Default queue name for identifier propagation.
pub const DEFAULT_QUEUE_NAME: &str = "doc_id_queue";

/// Topic scheme configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueScheme {
    /// Namespace segment
    pub tenant: String,
    /// Topic prefix (default: "docid")
    pub prefix: String,
}

impl Default for QueueScheme {
    fn default() -> Self {
        Self::new("default")
    }
}

impl QueueScheme {
    /// Create a new scheme with the given namespace segment.
    #[must_use]
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            prefix: "docid".to_string(),
        }
    }

    fn base(&self) -> String {
        format!("{}/{}/{}/queue", self.prefix, PROTOCOL_VERSION, self.tenant)
    }

    /// Work topic for a queue.
    #[must_use]
    pub fn work(&self, queue_name: &str) -> String {
        format!("{}/{queue_name}", self.base())
    }

    /// Dead-letter topic for a queue.
    #[must_use]
    pub fn dead_letter(&self, queue_name: &str) -> String {
        format!("{}/{queue_name}/dead", self.base())
    }

    /// Parse a topic into `(queue_name, channel)`.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<(String, QueueChannel)> {
        let expected_prefix = format!("{}/", self.base());
        let remainder = topic.strip_prefix(&expected_prefix)?;

        let parts: Vec<&str> = remainder.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Some(((*name).to_string(), QueueChannel::Work)),
            [name, "dead"] if !name.is_empty() => {
                Some(((*name).to_string(), QueueChannel::DeadLetter))
            }
            _ => None,
        }
    }
}

/// Channel of a queue topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueChannel {
    /// Messages awaiting a worker
    Work,
    /// Messages whose update failed
    DeadLetter,
}
