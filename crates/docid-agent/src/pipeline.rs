//! Identifier assignment pipeline.
//!
//! ```text
//! trigger ─▶ gate ─▶ enumerate versions ─▶ claim ledger ─┬─ recorded ───────────▶ reuse
//!                                                        ├─ on a version ─▶ claim ─▶ adopt
//!                                                        └─ none ─▶ allocate ─▶ claim
//!                                 │
//!                                 ▼
//!   one message per unassigned version (queued)
//!   or one direct update per version (synchronous)
//! ```
//!
//! Identifiers are allocated per document: every version of a document
//! receives the same identifier. The counter is only drawn from when no
//! version of the document carries one yet.

use crate::allocator::{AllocationError, SequenceAllocator};
use crate::persistence::{SqliteStore, StoreError};
use crate::queue::{PropagationQueue, QueueAcceptance};
use crate::remote::{DocumentUpdater, VersionQuery};
use docid_adapter_vault::{ClientError, FieldNames, FieldUpdate};
use docid_core::{
    established_identifier, needs_allocation, select_fan_out, version_label, ClaimOutcome,
    DocumentIdentifier, DocumentVersion, EstablishedIdentifier, VersionNumber,
};
use docid_proto::PropagationMessage;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How the identifier reaches the versions of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanOutMode {
    /// Enqueue one message per version for a worker
    #[default]
    Queued,
    /// Update each version directly, aborting on the first failure
    Synchronous,
}

impl FromStr for FanOutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "synchronous" | "sync" => Ok(Self::Synchronous),
            other => Err(format!("unknown fan-out mode '{other}'")),
        }
    }
}

impl fmt::Display for FanOutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Synchronous => "synchronous",
        })
    }
}

/// Where fanned-out updates go.
#[derive(Clone)]
pub enum FanOutTarget {
    /// Through a propagation queue
    Queued(Arc<dyn PropagationQueue>),
    /// Straight to the remote store
    Synchronous(Arc<dyn DocumentUpdater>),
}

impl FanOutTarget {
    /// Mode this target implements.
    #[must_use]
    pub fn mode(&self) -> FanOutMode {
        match self {
            Self::Queued(_) => FanOutMode::Queued,
            Self::Synchronous(_) => FanOutMode::Synchronous,
        }
    }
}

/// How the document's identifier was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierSource {
    /// Triggering version already had a value; nothing was done
    AlreadyAssigned {
        /// Value found on the version
        existing: String,
    },
    /// Freshly allocated and claimed
    Minted,
    /// Claimed by an earlier run; no allocation
    Reused,
    /// Found on another version of the document and claimed; no allocation
    Adopted {
        /// Version the identifier was read from
        from: VersionNumber,
    },
    /// Allocated, but a concurrent run claimed first
    RaceLost {
        /// Identifier whose counter value was spent for nothing
        discarded: DocumentIdentifier,
    },
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct AssignmentReport {
    /// Document identity
    pub doc_id: String,
    /// Identifier propagated, `None` when the trigger was already assigned
    pub identifier: Option<DocumentIdentifier>,
    /// How the identifier was obtained
    pub source: IdentifierSource,
    /// Versions whose message was accepted by the queue
    pub queued: Vec<VersionNumber>,
    /// Versions whose message the queue refused, with the reason
    pub rejected: Vec<(VersionNumber, String)>,
    /// Versions updated directly
    pub updated: Vec<VersionNumber>,
}

impl AssignmentReport {
    fn new(doc_id: &str, identifier: Option<DocumentIdentifier>, source: IdentifierSource) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            identifier,
            source,
            queued: Vec::new(),
            rejected: Vec::new(),
            updated: Vec::new(),
        }
    }

    /// Whether a new counter value was consumed by this run.
    #[must_use]
    pub fn allocated(&self) -> bool {
        matches!(
            self.source,
            IdentifierSource::Minted | IdentifierSource::RaceLost { .. }
        )
    }
}

impl fmt::Display for AssignmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source, &self.identifier) {
            (IdentifierSource::AlreadyAssigned { existing }, _) => {
                return write!(f, "document {} already has identifier {existing}", self.doc_id);
            }
            (source, Some(identifier)) => {
                let how = match source {
                    IdentifierSource::Minted => "minted".to_string(),
                    IdentifierSource::Reused => "reused".to_string(),
                    IdentifierSource::Adopted { from } => format!("adopted from version {from}"),
                    IdentifierSource::RaceLost { discarded } => {
                        format!("claimed concurrently, discarded {discarded}")
                    }
                    IdentifierSource::AlreadyAssigned { .. } => String::new(),
                };
                write!(f, "document {} identifier {identifier} ({how})", self.doc_id)?;
            }
            (_, None) => write!(f, "document {}", self.doc_id)?,
        }

        write!(
            f,
            ": {} queued, {} rejected, {} updated",
            self.queued.len(),
            self.rejected.len(),
            self.updated.len()
        )
    }
}

/// Allocates a document's identifier once and fans it out to its versions.
pub struct AssignmentPipeline {
    allocator: SequenceAllocator,
    claims: Arc<SqliteStore>,
    versions: Arc<dyn VersionQuery>,
    fields: FieldNames,
    api_connection: String,
    target: FanOutTarget,
}

impl AssignmentPipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(
        allocator: SequenceAllocator,
        claims: Arc<SqliteStore>,
        versions: Arc<dyn VersionQuery>,
        fields: FieldNames,
        api_connection: impl Into<String>,
        target: FanOutTarget,
    ) -> Self {
        Self {
            allocator,
            claims,
            versions,
            fields,
            api_connection: api_connection.into(),
            target,
        }
    }

    /// Fan-out mode of this pipeline.
    #[must_use]
    pub fn mode(&self) -> FanOutMode {
        self.target.mode()
    }

    /// Run the pipeline for the version that fired the trigger.
    ///
    /// # Errors
    ///
    /// Returns error if versions cannot be enumerated, a version holds a
    /// value that is not an identifier, allocation fails (including an
    /// exhausted sequence), the claim ledger is unavailable, or, in
    /// synchronous mode, any remote update fails.
    pub async fn assign(
        &self,
        trigger: &DocumentVersion,
    ) -> Result<AssignmentReport, PipelineError> {
        let doc_id = trigger.doc_id.as_str();

        if !needs_allocation(trigger) {
            let existing = trigger.assigned_identifier().unwrap_or_default().to_string();
            tracing::info!(
                label = %trigger.label(),
                existing,
                "Version already has an identifier"
            );
            return Ok(AssignmentReport::new(
                doc_id,
                None,
                IdentifierSource::AlreadyAssigned { existing },
            ));
        }

        let mut versions = self
            .versions
            .list_versions(doc_id, &self.fields.identifier)
            .await
            .map_err(|source| PipelineError::VersionQuery {
                doc_id: doc_id.to_string(),
                source,
            })?;
        if !versions.iter().any(|v| v.version == trigger.version) {
            versions.push(trigger.clone());
        }

        let (identifier, source) = self.obtain_identifier(doc_id, &versions).await?;
        let mut report = AssignmentReport::new(doc_id, Some(identifier.clone()), source);

        let targets = select_fan_out(&versions);
        tracing::info!(
            doc_id,
            identifier = %identifier,
            versions = versions.len(),
            targets = targets.len(),
            mode = %self.mode(),
            "Propagating identifier"
        );

        match &self.target {
            FanOutTarget::Queued(queue) => {
                for version in targets {
                    self.enqueue(queue.as_ref(), version, &identifier, &mut report)
                        .await;
                }
            }
            FanOutTarget::Synchronous(updater) => {
                let update = FieldUpdate::new(&self.fields, &identifier);
                for version in targets {
                    let label = version.label();
                    updater
                        .update_fields(doc_id, version.version, &update)
                        .await
                        .map_err(|source| {
                            tracing::error!(label, error = %source, "Document version update failed");
                            PipelineError::RemoteUpdateFailed {
                                label: label.clone(),
                                source,
                            }
                        })?;
                    tracing::info!(label, identifier = %identifier, "Document version updated");
                    report.updated.push(version.version);
                }
            }
        }

        Ok(report)
    }

    /// Reuse the recorded identifier, adopt one already on a version, or
    /// mint and claim a new one.
    async fn obtain_identifier(
        &self,
        doc_id: &str,
        versions: &[DocumentVersion],
    ) -> Result<(DocumentIdentifier, IdentifierSource), PipelineError> {
        if let Some(recorded) = self.claims.claimed_identifier(doc_id)? {
            tracing::info!(doc_id, identifier = %recorded, "Reusing claimed identifier");
            return Ok((recorded, IdentifierSource::Reused));
        }

        match established_identifier(versions) {
            Some(EstablishedIdentifier::Valid {
                version,
                identifier,
            }) => {
                return match self.claims.claim_identifier(doc_id, &identifier)? {
                    ClaimOutcome::Won(identifier) => {
                        tracing::info!(
                            doc_id,
                            identifier = %identifier,
                            from = %version,
                            "Adopted identifier from existing version"
                        );
                        Ok((identifier, IdentifierSource::Adopted { from: version }))
                    }
                    ClaimOutcome::Lost { winner, .. } => {
                        tracing::info!(doc_id, identifier = %winner, "Reusing claimed identifier");
                        Ok((winner, IdentifierSource::Reused))
                    }
                };
            }
            Some(EstablishedIdentifier::Unrecognized { version, value }) => {
                return Err(PipelineError::UnrecognizedIdentifier {
                    label: version_label(doc_id, version),
                    value: value.to_string(),
                });
            }
            None => {}
        }

        let minted = self.allocator.allocate().await?;

        match self.claims.claim_identifier(doc_id, &minted)? {
            ClaimOutcome::Won(identifier) => {
                tracing::info!(doc_id, identifier = %identifier, "Identifier claimed");
                Ok((identifier, IdentifierSource::Minted))
            }
            ClaimOutcome::Lost { winner, discarded } => {
                tracing::warn!(
                    doc_id,
                    winner = %winner,
                    leaked = %discarded,
                    leaked_value = discarded.value(),
                    "Concurrent claim won; counter value leaked"
                );
                Ok((winner, IdentifierSource::RaceLost { discarded }))
            }
        }
    }

    async fn enqueue(
        &self,
        queue: &dyn PropagationQueue,
        version: &DocumentVersion,
        identifier: &DocumentIdentifier,
        report: &mut AssignmentReport,
    ) {
        let message = PropagationMessage::new(
            version.doc_id.clone(),
            version.version,
            identifier.clone(),
            self.api_connection.clone(),
        );
        let label = version_label(&version.doc_id, version.version);

        match queue.enqueue(&message).await {
            QueueAcceptance::Accepted { message_id } => {
                tracing::info!(label, message_id, queue = queue.name(), "Update queued");
                report.queued.push(version.version);
            }
            QueueAcceptance::Rejected { error } => {
                tracing::warn!(label, error, queue = queue.name(), "Queue rejected update");
                report.rejected.push((version.version, error));
            }
        }
    }
}

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Identifier allocation failed
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// Claim ledger unavailable
    #[error("claim ledger error: {0}")]
    Store(#[from] StoreError),
    /// Versions could not be enumerated
    #[error("version query failed for document {doc_id}: {source}")]
    VersionQuery {
        /// Document identity
        doc_id: String,
        /// Underlying failure
        #[source]
        source: ClientError,
    },
    /// A version carries a value that is not an identifier; minting a new
    /// one would give the document two
    #[error("{label} carries '{value}', which is not a document identifier")]
    UnrecognizedIdentifier {
        /// `{doc_id}_{major}_{minor}` of the version
        label: String,
        /// Field value found
        value: String,
    },
    /// A synchronous update failed
    #[error("remote update failed for {label}: {source}")]
    RemoteUpdateFailed {
        /// `{doc_id}_{major}_{minor}` of the version
        label: String,
        /// Underlying failure
        #[source]
        source: ClientError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{SequenceError, SequenceSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingSequence {
        next: AtomicU64,
        calls: AtomicUsize,
    }

    impl CountingSequence {
        fn starting_at(value: u64) -> Arc<Self> {
            Arc::new(Self {
                next: AtomicU64::new(value),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SequenceSource for CountingSequence {
        async fn next_value(&self) -> Result<u64, SequenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }
    }

    struct StaticVersions(Vec<DocumentVersion>);

    #[async_trait]
    impl VersionQuery for StaticVersions {
        async fn list_versions(
            &self,
            _doc_id: &str,
            _identifier_field: &str,
        ) -> Result<Vec<DocumentVersion>, ClientError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        messages: Mutex<Vec<PropagationMessage>>,
        reject_minor: Option<u32>,
    }

    #[async_trait]
    impl PropagationQueue for RecordingQueue {
        fn name(&self) -> &str {
            "doc_id_queue"
        }

        async fn enqueue(&self, message: &PropagationMessage) -> QueueAcceptance {
            if Some(message.version.minor) == self.reject_minor {
                return QueueAcceptance::Rejected {
                    error: "queue full".to_string(),
                };
            }
            self.messages.lock().unwrap().push(message.clone());
            QueueAcceptance::Accepted {
                message_id: format!("m{}", self.messages.lock().unwrap().len()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingUpdater {
        updates: Mutex<Vec<(VersionNumber, Vec<(String, String)>)>>,
        fail_on: Option<VersionNumber>,
    }

    #[async_trait]
    impl DocumentUpdater for RecordingUpdater {
        async fn update_fields(
            &self,
            _doc_id: &str,
            version: VersionNumber,
            update: &FieldUpdate<'_>,
        ) -> Result<(), ClientError> {
            if Some(version) == self.fail_on {
                return Err(ClientError::Rejected {
                    status: "FAILURE".to_string(),
                    error_type: None,
                    message: "field locked".to_string(),
                });
            }
            let pairs = update
                .form_pairs()
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect();
            self.updates.lock().unwrap().push((version, pairs));
            Ok(())
        }
    }

    fn unassigned(major: u32, minor: u32) -> DocumentVersion {
        DocumentVersion::unassigned("101", VersionNumber::new(major, minor))
    }

    fn pipeline(
        sequence: Arc<CountingSequence>,
        store: Arc<SqliteStore>,
        versions: Vec<DocumentVersion>,
        target: FanOutTarget,
    ) -> AssignmentPipeline {
        AssignmentPipeline::new(
            SequenceAllocator::new(sequence),
            store,
            Arc::new(StaticVersions(versions)),
            FieldNames::default(),
            "local_http_callout_connection",
            target,
        )
    }

    #[tokio::test]
    async fn assigned_trigger_is_left_alone() {
        let sequence = CountingSequence::starting_at(5);
        let queue = Arc::new(RecordingQueue::default());
        let pipeline = pipeline(
            sequence.clone(),
            Arc::new(SqliteStore::in_memory().unwrap()),
            vec![unassigned(0, 1)],
            FanOutTarget::Queued(queue.clone()),
        );

        let trigger = unassigned(1, 0).with_identifier("ABC123");
        let report = pipeline.assign(&trigger).await.unwrap();

        assert_eq!(
            report.source,
            IdentifierSource::AlreadyAssigned {
                existing: "ABC123".to_string()
            }
        );
        assert!(!report.allocated());
        assert_eq!(sequence.calls(), 0);
        assert!(queue.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_message_per_unassigned_version() {
        let sequence = CountingSequence::starting_at(5);
        let queue = Arc::new(RecordingQueue::default());
        let pipeline = pipeline(
            sequence.clone(),
            Arc::new(SqliteStore::in_memory().unwrap()),
            vec![
                unassigned(0, 1),
                unassigned(0, 2),
                unassigned(1, 0),
                unassigned(1, 0),
            ],
            FanOutTarget::Queued(queue.clone()),
        );

        let report = pipeline.assign(&unassigned(1, 0)).await.unwrap();

        assert_eq!(report.source, IdentifierSource::Minted);
        assert_eq!(report.identifier.as_ref().unwrap().as_str(), "000005");
        assert_eq!(sequence.calls(), 1);

        let messages = queue.messages.lock().unwrap();
        let versions: Vec<_> = messages.iter().map(|m| m.version).collect();
        assert_eq!(
            versions,
            vec![
                VersionNumber::new(0, 1),
                VersionNumber::new(0, 2),
                VersionNumber::new(1, 0),
            ]
        );
        assert!(messages.iter().all(|m| m.identifier.as_str() == "000005"));
        assert!(messages
            .iter()
            .all(|m| m.api_connection == "local_http_callout_connection"));
        assert_eq!(report.queued.len(), 3);
    }

    #[tokio::test]
    async fn trigger_missing_from_query_is_still_updated() {
        let queue = Arc::new(RecordingQueue::default());
        let pipeline = pipeline(
            CountingSequence::starting_at(1),
            Arc::new(SqliteStore::in_memory().unwrap()),
            Vec::new(),
            FanOutTarget::Queued(queue.clone()),
        );

        let report = pipeline.assign(&unassigned(0, 1)).await.unwrap();
        assert_eq!(report.queued, vec![VersionNumber::new(0, 1)]);
    }

    #[tokio::test]
    async fn exhausted_sequence_queues_nothing() {
        let sequence = CountingSequence::starting_at(729_000_000);
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = Arc::new(RecordingQueue::default());
        let pipeline = pipeline(
            sequence.clone(),
            store.clone(),
            vec![unassigned(0, 1)],
            FanOutTarget::Queued(queue.clone()),
        );

        let err = pipeline.assign(&unassigned(0, 1)).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Allocation(AllocationError::SequenceExhausted { .. })
        ));
        assert_eq!(sequence.calls(), 1);
        assert!(queue.messages.lock().unwrap().is_empty());
        assert_eq!(store.claimed_identifier("101").unwrap(), None);
    }

    #[tokio::test]
    async fn recorded_claim_is_reused_without_allocating() {
        let sequence = CountingSequence::starting_at(50);
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let earlier = DocumentIdentifier::from_sequence(7).unwrap();
        store.claim_identifier("101", &earlier).unwrap();

        let queue = Arc::new(RecordingQueue::default());
        let pipeline = pipeline(
            sequence.clone(),
            store,
            vec![unassigned(0, 1)],
            FanOutTarget::Queued(queue.clone()),
        );

        let report = pipeline.assign(&unassigned(0, 1)).await.unwrap();

        assert_eq!(report.source, IdentifierSource::Reused);
        assert_eq!(report.identifier, Some(earlier.clone()));
        assert_eq!(sequence.calls(), 0);
        assert_eq!(queue.messages.lock().unwrap()[0].identifier, earlier);
    }

    #[tokio::test]
    async fn identifier_on_another_version_is_adopted() {
        let sequence = CountingSequence::starting_at(5);
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = Arc::new(RecordingQueue::default());
        let pipeline = pipeline(
            sequence.clone(),
            store.clone(),
            vec![
                unassigned(0, 1).with_identifier("00000B"),
                unassigned(0, 2),
                unassigned(1, 0),
            ],
            FanOutTarget::Queued(queue.clone()),
        );

        let report = pipeline.assign(&unassigned(1, 0)).await.unwrap();

        let existing = DocumentIdentifier::parse("00000B").unwrap();
        assert_eq!(
            report.source,
            IdentifierSource::Adopted {
                from: VersionNumber::new(0, 1)
            }
        );
        assert!(!report.allocated());
        assert_eq!(report.identifier, Some(existing.clone()));
        assert_eq!(sequence.calls(), 0);
        assert_eq!(store.claimed_identifier("101").unwrap(), Some(existing.clone()));
        {
            let messages = queue.messages.lock().unwrap();
            let versions: Vec<_> = messages.iter().map(|m| m.version).collect();
            assert_eq!(versions, vec![VersionNumber::new(0, 2), VersionNumber::new(1, 0)]);
            assert!(messages.iter().all(|m| m.identifier == existing));
        }

        let again = pipeline.assign(&unassigned(1, 0)).await.unwrap();
        assert_eq!(again.source, IdentifierSource::Reused);
        assert_eq!(sequence.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_sibling_value_blocks_minting() {
        let sequence = CountingSequence::starting_at(5);
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = Arc::new(RecordingQueue::default());
        let pipeline = pipeline(
            sequence.clone(),
            store.clone(),
            vec![unassigned(0, 1).with_identifier("legacy-7"), unassigned(0, 2)],
            FanOutTarget::Queued(queue.clone()),
        );

        let err = pipeline.assign(&unassigned(0, 2)).await.unwrap_err();

        assert!(matches!(
            &err,
            PipelineError::UnrecognizedIdentifier { label, value }
                if label == "101_0_1" && value == "legacy-7"
        ));
        assert_eq!(sequence.calls(), 0);
        assert_eq!(store.claimed_identifier("101").unwrap(), None);
        assert!(queue.messages.lock().unwrap().is_empty());
    }

    /// Sequence that lets a rival run claim the document while it hands
    /// out a value.
    struct ContendedSequence {
        store: Arc<SqliteStore>,
        rival: DocumentIdentifier,
        inner: Arc<CountingSequence>,
    }

    #[async_trait]
    impl SequenceSource for ContendedSequence {
        async fn next_value(&self) -> Result<u64, SequenceError> {
            self.store.claim_identifier("101", &self.rival).unwrap();
            self.inner.next_value().await
        }
    }

    #[tokio::test]
    async fn concurrent_claim_wins_and_minted_value_is_discarded() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let counter = CountingSequence::starting_at(5);
        let rival = DocumentIdentifier::from_sequence(7).unwrap();
        let queue = Arc::new(RecordingQueue::default());
        let pipeline = AssignmentPipeline::new(
            SequenceAllocator::new(Arc::new(ContendedSequence {
                store: store.clone(),
                rival: rival.clone(),
                inner: counter.clone(),
            })),
            store.clone(),
            Arc::new(StaticVersions(vec![unassigned(0, 1), unassigned(1, 0)])),
            FieldNames::default(),
            "local_http_callout_connection",
            FanOutTarget::Queued(queue.clone()),
        );

        let report = pipeline.assign(&unassigned(1, 0)).await.unwrap();

        assert_eq!(
            report.source,
            IdentifierSource::RaceLost {
                discarded: DocumentIdentifier::from_sequence(5).unwrap()
            }
        );
        assert!(report.allocated());
        assert_eq!(report.identifier, Some(rival.clone()));
        assert_eq!(counter.calls(), 1);
        assert_eq!(store.claimed_identifier("101").unwrap(), Some(rival.clone()));

        let messages = queue.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.identifier == rival));
    }

    #[tokio::test]
    async fn rejected_messages_are_reported_not_retried() {
        let queue = Arc::new(RecordingQueue {
            reject_minor: Some(2),
            ..RecordingQueue::default()
        });
        let pipeline = pipeline(
            CountingSequence::starting_at(1),
            Arc::new(SqliteStore::in_memory().unwrap()),
            vec![unassigned(0, 1), unassigned(0, 2), unassigned(0, 3)],
            FanOutTarget::Queued(queue.clone()),
        );

        let report = pipeline.assign(&unassigned(0, 3)).await.unwrap();

        assert_eq!(report.queued.len(), 2);
        assert_eq!(
            report.rejected,
            vec![(VersionNumber::new(0, 2), "queue full".to_string())]
        );
        assert_eq!(queue.messages.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn synchronous_mode_sets_both_fields() {
        let updater = Arc::new(RecordingUpdater::default());
        let pipeline = pipeline(
            CountingSequence::starting_at(5),
            Arc::new(SqliteStore::in_memory().unwrap()),
            vec![unassigned(0, 1), unassigned(1, 0)],
            FanOutTarget::Synchronous(updater.clone()),
        );

        let report = pipeline.assign(&unassigned(1, 0)).await.unwrap();

        assert_eq!(report.updated.len(), 2);
        let updates = updater.updates.lock().unwrap();
        assert_eq!(
            updates[0].1,
            vec![
                ("newco_document_id__c".to_string(), "000005".to_string()),
                ("export_filename__v".to_string(), "000005".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn synchronous_failure_aborts() {
        let updater = Arc::new(RecordingUpdater {
            fail_on: Some(VersionNumber::new(0, 1)),
            ..RecordingUpdater::default()
        });
        let pipeline = pipeline(
            CountingSequence::starting_at(5),
            Arc::new(SqliteStore::in_memory().unwrap()),
            vec![unassigned(0, 1), unassigned(1, 0)],
            FanOutTarget::Synchronous(updater.clone()),
        );

        let err = pipeline.assign(&unassigned(1, 0)).await.unwrap_err();

        assert!(matches!(
            &err,
            PipelineError::RemoteUpdateFailed { label, .. } if label == "101_0_1"
        ));
        assert!(err.to_string().contains("field locked"));
        assert!(updater.updates.lock().unwrap().is_empty());
    }

    #[test]
    fn fan_out_mode_parsing() {
        assert_eq!("queued".parse::<FanOutMode>(), Ok(FanOutMode::Queued));
        assert_eq!(
            "Synchronous".parse::<FanOutMode>(),
            Ok(FanOutMode::Synchronous)
        );
        assert!("later".parse::<FanOutMode>().is_err());
    }
}
