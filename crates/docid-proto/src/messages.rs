//! Propagation messages.

use docid_core::{version_label, DocumentIdentifier, VersionNumber};
use serde::{Deserialize, Serialize};

/// Wire attributes of a propagation message.
///
/// Every value travels as a string; numeric fields are parsed by the
/// consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttributes {
    /// Document identity
    pub doc_id: String,
    /// Encoded identifier to apply
    pub base30_document_id: String,
    /// Name of the connection the worker should call through
    pub api_connection: String,
    /// Target major version
    pub major_version_number: String,
    /// Target minor version
    pub minor_version_number: String,
}

/// One self-contained update of one document version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MessageAttributes", into = "MessageAttributes")]
pub struct PropagationMessage {
    /// Document identity
    pub doc_id: String,
    /// Target version
    pub version: VersionNumber,
    /// Identifier to write
    pub identifier: DocumentIdentifier,
    /// Destination connection descriptor
    pub api_connection: String,
}

impl PropagationMessage {
    /// Create a new propagation message.
    #[must_use]
    pub fn new(
        doc_id: impl Into<String>,
        version: VersionNumber,
        identifier: DocumentIdentifier,
        api_connection: impl Into<String>,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            version,
            identifier,
            api_connection: api_connection.into(),
        }
    }

    /// `{doc_id}_{major}_{minor}` label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        version_label(&self.doc_id, self.version)
    }

    /// Render the wire attributes.
    #[must_use]
    pub fn to_attributes(&self) -> MessageAttributes {
        MessageAttributes::from(self.clone())
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization or attribute validation fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

impl From<PropagationMessage> for MessageAttributes {
    fn from(message: PropagationMessage) -> Self {
        Self {
            doc_id: message.doc_id,
            base30_document_id: message.identifier.to_string(),
            api_connection: message.api_connection,
            major_version_number: message.version.major.to_string(),
            minor_version_number: message.version.minor.to_string(),
        }
    }
}

impl TryFrom<MessageAttributes> for PropagationMessage {
    type Error = MessageError;

    fn try_from(attrs: MessageAttributes) -> Result<Self, Self::Error> {
        let doc_id = non_empty("docId", attrs.doc_id)?;
        let api_connection = non_empty("apiConnection", attrs.api_connection)?;
        let identifier = DocumentIdentifier::parse(attrs.base30_document_id.trim()).map_err(|e| {
            MessageError::InvalidAttribute {
                name: "base30DocumentId",
                value: attrs.base30_document_id.clone(),
                reason: e.to_string(),
            }
        })?;
        let major = parse_version_component("majorVersionNumber", &attrs.major_version_number)?;
        let minor = parse_version_component("minorVersionNumber", &attrs.minor_version_number)?;

        Ok(Self {
            doc_id,
            version: VersionNumber::new(major, minor),
            identifier,
            api_connection,
        })
    }
}

fn non_empty(name: &'static str, value: String) -> Result<String, MessageError> {
    if value.trim().is_empty() {
        return Err(MessageError::InvalidAttribute {
            name,
            value,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(value)
}

/// Parse a version number attribute. Decimal renderings with a zero
/// fraction (`"2.0"`) are accepted since some producers emit them.
fn parse_version_component(name: &'static str, raw: &str) -> Result<u32, MessageError> {
    let trimmed = raw.trim();
    let integral = match trimmed.split_once('.') {
        Some((whole, fraction)) if fraction.bytes().all(|b| b == b'0') => whole,
        _ => trimmed,
    };

    integral.parse().map_err(|_| MessageError::InvalidAttribute {
        name,
        value: raw.to_string(),
        reason: "not a non-negative integer".to_string(),
    })
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    /// An attribute failed validation
    #[error("invalid attribute {name}={value:?}: {reason}")]
    InvalidAttribute {
        /// Attribute name
        name: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}
