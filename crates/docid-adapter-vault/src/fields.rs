//! Document fields written by identifier propagation.
//!
//! The set of fields is fixed: the identifier field and the export filename
//! field, both receiving the encoded identifier. Only their API names are
//! configurable.

use docid_core::DocumentIdentifier;
use serde::{Deserialize, Serialize};

/// Default API name of the identifier field.
pub const DEFAULT_IDENTIFIER_FIELD: &str = "newco_document_id__c";

/// Default API name of the export filename field.
pub const DEFAULT_EXPORT_FILENAME_FIELD: &str = "export_filename__v";

/// API names of the fields the pipeline writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNames {
    /// Field holding the document identifier
    pub identifier: String,
    /// Field holding the export filename
    pub export_filename: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            identifier: DEFAULT_IDENTIFIER_FIELD.to_string(),
            export_filename: DEFAULT_EXPORT_FILENAME_FIELD.to_string(),
        }
    }
}

impl FieldNames {
    /// Both names, identifier first.
    #[must_use]
    pub fn names(&self) -> [&str; 2] {
        [&self.identifier, &self.export_filename]
    }

    /// Check that both names are plausible API names (`[a-z0-9_]+`) and
    /// distinct.
    ///
    /// # Errors
    ///
    /// Returns the offending name.
    pub fn validate(&self) -> Result<(), FieldNameError> {
        for name in self.names() {
            let valid = !name.is_empty()
                && name
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
            if !valid {
                return Err(FieldNameError::Invalid(name.to_string()));
            }
        }
        if self.identifier == self.export_filename {
            return Err(FieldNameError::Duplicate(self.identifier.clone()));
        }
        Ok(())
    }
}

/// Invalid field name configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldNameError {
    /// Name contains characters outside `[a-z0-9_]`
    #[error("invalid field name {0:?}")]
    Invalid(String),
    /// Both fields share one name
    #[error("identifier and export filename fields are both {0:?}")]
    Duplicate(String),
}

/// Values to write to one document version.
#[derive(Debug, Clone, Copy)]
pub struct FieldUpdate<'a> {
    names: &'a FieldNames,
    identifier: &'a DocumentIdentifier,
}

impl<'a> FieldUpdate<'a> {
    /// Write `identifier` to both fields.
    #[must_use]
    pub fn new(names: &'a FieldNames, identifier: &'a DocumentIdentifier) -> Self {
        Self { names, identifier }
    }

    /// Identifier being written.
    #[must_use]
    pub fn identifier(&self) -> &DocumentIdentifier {
        self.identifier
    }

    /// Form body parameters, one per field.
    #[must_use]
    pub fn form_pairs(&self) -> [(&'a str, &'a str); 2] {
        let value = self.identifier.as_str();
        [
            (self.names.identifier.as_str(), value),
            (self.names.export_filename.as_str(), value),
        ]
    }
}
