//! Seams to the remote document store.
//!
//! The pipeline and worker only see these traits; [`VaultClient`] implements
//! both, and tests substitute in-memory fakes.

use async_trait::async_trait;
use docid_adapter_vault::{ClientError, FieldUpdate, VaultClient};
use docid_core::{DocumentVersion, VersionNumber};
use std::collections::HashMap;
use std::sync::Arc;

/// Enumerates the versions of a document.
#[async_trait]
pub trait VersionQuery: Send + Sync {
    /// All versions of `doc_id` with the current value of `identifier_field`.
    async fn list_versions(
        &self,
        doc_id: &str,
        identifier_field: &str,
    ) -> Result<Vec<DocumentVersion>, ClientError>;
}

/// Writes identifier fields to one document version.
#[async_trait]
pub trait DocumentUpdater: Send + Sync {
    /// Apply `update` to `doc_id` at `version`.
    async fn update_fields(
        &self,
        doc_id: &str,
        version: VersionNumber,
        update: &FieldUpdate<'_>,
    ) -> Result<(), ClientError>;
}

#[async_trait]
impl VersionQuery for VaultClient {
    async fn list_versions(
        &self,
        doc_id: &str,
        identifier_field: &str,
    ) -> Result<Vec<DocumentVersion>, ClientError> {
        self.list_document_versions(doc_id, identifier_field).await
    }
}

#[async_trait]
impl DocumentUpdater for VaultClient {
    async fn update_fields(
        &self,
        doc_id: &str,
        version: VersionNumber,
        update: &FieldUpdate<'_>,
    ) -> Result<(), ClientError> {
        self.update_document_fields(doc_id, version, update).await
    }
}

/// Named destinations a propagation message can point at.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Arc<dyn DocumentUpdater>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection, replacing any previous one of the same name.
    #[must_use]
    pub fn with_connection(
        mut self,
        name: impl Into<String>,
        updater: Arc<dyn DocumentUpdater>,
    ) -> Self {
        self.connections.insert(name.into(), updater);
        self
    }

    /// Look up a connection by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn DocumentUpdater>> {
        self.connections.get(name).cloned()
    }

    /// Registered connection names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
