//! # docid Protocol
//!
//! Message schema and queue naming for identifier propagation.
//!
//! ## Messages
//!
//! - `PropagationMessage`: one identifier update for one document version,
//!   carried as the string attributes `docId`, `base30DocumentId`,
//!   `apiConnection`, `majorVersionNumber`, `minorVersionNumber`
//!
//! ## Topics
//!
//! Topic scheme: `docid/v1/{tenant}/queue/{queue_name}[/dead]`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod queues;

pub use messages::{MessageAttributes, MessageError, PropagationMessage};
pub use queues::{QueueChannel, QueueScheme, DEFAULT_QUEUE_NAME};
