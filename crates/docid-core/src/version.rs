//! Document version model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Major/minor version coordinate of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionNumber {
    /// Major version number
    pub major: u32,
    /// Minor version number
    pub minor: u32,
}

impl VersionNumber {
    /// Create a version coordinate.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for VersionNumber {
    type Err = VersionParseError;

    /// Parse `"major.minor"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| VersionParseError(s.to_string()))?;
        let major = major
            .parse()
            .map_err(|_| VersionParseError(s.to_string()))?;
        let minor = minor
            .parse()
            .map_err(|_| VersionParseError(s.to_string()))?;
        Ok(Self { major, minor })
    }
}

/// Version string is not `major.minor`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version number {0:?}, expected major.minor")]
pub struct VersionParseError(pub String);

/// One revision of a document as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    /// Document identity, stable across versions
    pub doc_id: String,
    /// Version coordinate
    pub version: VersionNumber,
    /// Current identifier field; `None` or empty means not yet assigned
    pub identifier: Option<String>,
}

impl DocumentVersion {
    /// Create a version without an identifier.
    #[must_use]
    pub fn unassigned(doc_id: impl Into<String>, version: VersionNumber) -> Self {
        Self {
            doc_id: doc_id.into(),
            version,
            identifier: None,
        }
    }

    /// Set the identifier field.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// The identifier field if it holds a value.
    #[must_use]
    pub fn assigned_identifier(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// `{doc_id}_{major}_{minor}`, the form used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        version_label(&self.doc_id, self.version)
    }
}

/// `{doc_id}_{major}_{minor}` label for a version coordinate.
#[must_use]
pub fn version_label(doc_id: &str, version: VersionNumber) -> String {
    format!("{doc_id}_{}_{}", version.major, version.minor)
}

/// Propagation status of one queued version update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationState {
    /// Waiting for a worker
    Pending,
    /// Claimed by a worker
    InFlight,
    /// Remote update acknowledged
    Succeeded,
    /// Failed and out of attempts
    DeadLettered,
}

impl PropagationState {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Parse a storage name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "succeeded" => Some(Self::Succeeded),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }

    /// Whether the pipeline will do nothing further with this message.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::DeadLettered)
    }
}

impl fmt::Display for PropagationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
