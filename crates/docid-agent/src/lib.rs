//! # docid Agent
//!
//! Identifier allocation and propagation runtime.
//!
//! ## Architecture
//!
//! 1. **Allocation**: a [`sequence::SequenceSource`] hands out counter values
//!    that [`allocator::SequenceAllocator`] encodes as identifiers
//! 2. **Claiming**: the claim ledger in [`persistence::SqliteStore`] keeps one
//!    identifier per document even under concurrent triggers
//! 3. **Fan-out**: [`pipeline::AssignmentPipeline`] queues one message per
//!    unassigned version, or updates them directly
//! 4. **Propagation**: [`worker::VersionUpdateWorker`] consumes the queue and
//!    writes the identifier fields through the remote API
//!
//! The `docid-agent` binary runs the consumer side; the `docid` CLI drives
//! the trigger side with the same configuration.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod config;
pub mod mqtt;
pub mod persistence;
pub mod pipeline;
pub mod queue;
pub mod remote;
pub mod runtime;
pub mod sequence;
pub mod worker;

pub use allocator::{AllocationError, SequenceAllocator};
pub use config::AgentConfig;
pub use persistence::{SqliteStore, StoreError};
pub use pipeline::{AssignmentPipeline, AssignmentReport, FanOutMode, PipelineError};
pub use queue::{PropagationQueue, QueueAcceptance};
pub use runtime::{build_pipeline, Agent, Components};
pub use worker::{UpdateResult, VersionUpdateWorker};
