//! Assignment gate.
//!
//! An identifier field that holds any non-blank value is sealed: the gate
//! never compares which value is present, it only answers whether a new
//! allocation is needed. Every entry point to allocation must ask the gate
//! first, because the trigger may fire more than once for the same version.

use crate::identifier::DocumentIdentifier;
use crate::version::{DocumentVersion, VersionNumber};
use std::collections::BTreeMap;

/// Whether `version` still needs an identifier.
#[must_use]
pub fn needs_allocation(version: &DocumentVersion) -> bool {
    version.assigned_identifier().is_none()
}

/// Versions that should receive an identifier, one per distinct
/// `(major, minor)` pair, in version order.
#[must_use]
pub fn select_fan_out(versions: &[DocumentVersion]) -> Vec<&DocumentVersion> {
    let mut selected = BTreeMap::<VersionNumber, &DocumentVersion>::new();
    for version in versions.iter().filter(|v| needs_allocation(v)) {
        selected.entry(version.version).or_insert(version);
    }
    selected.into_values().collect()
}

/// Identifier some version of a document already carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstablishedIdentifier<'a> {
    /// A well-formed identifier on the earliest such version
    Valid {
        /// Version carrying it
        version: VersionNumber,
        /// The identifier
        identifier: DocumentIdentifier,
    },
    /// Only values that are not identifiers were found; the earliest one
    Unrecognized {
        /// Version carrying it
        version: VersionNumber,
        /// Raw field value
        value: &'a str,
    },
}

/// The identifier the document already has, if any version carries one.
///
/// Well-formed identifiers win over malformed values; among equals the
/// lowest version wins.
#[must_use]
pub fn established_identifier(versions: &[DocumentVersion]) -> Option<EstablishedIdentifier<'_>> {
    let mut assigned: Vec<(VersionNumber, &str)> = versions
        .iter()
        .filter_map(|v| v.assigned_identifier().map(|value| (v.version, value)))
        .collect();
    assigned.sort_by_key(|(version, _)| *version);

    assigned
        .iter()
        .find_map(|&(version, value)| {
            DocumentIdentifier::parse(value)
                .ok()
                .map(|identifier| EstablishedIdentifier::Valid {
                    version,
                    identifier,
                })
        })
        .or_else(|| {
            assigned
                .first()
                .map(|&(version, value)| EstablishedIdentifier::Unrecognized { version, value })
        })
}

/// Result of recording a document's identifier in the claim ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller's identifier was recorded
    Won(DocumentIdentifier),
    /// An identifier was already recorded for the document
    Lost {
        /// Identifier recorded by the earlier caller
        winner: DocumentIdentifier,
        /// Identifier this caller minted; its counter value is spent
        discarded: DocumentIdentifier,
    },
}

impl ClaimOutcome {
    /// The identifier that now belongs to the document.
    #[must_use]
    pub fn identifier(&self) -> &DocumentIdentifier {
        match self {
            Self::Won(identifier) | Self::Lost { winner: identifier, .. } => identifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(major: u32, minor: u32, identifier: Option<&str>) -> DocumentVersion {
        DocumentVersion {
            doc_id: "101".to_string(),
            version: VersionNumber::new(major, minor),
            identifier: identifier.map(str::to_string),
        }
    }

    #[test]
    fn empty_or_missing_field_needs_allocation() {
        assert!(needs_allocation(&version(0, 1, None)));
        assert!(needs_allocation(&version(0, 1, Some(""))));
        assert!(needs_allocation(&version(0, 1, Some("   "))));
    }

    #[test]
    fn any_existing_value_is_sealed() {
        assert!(!needs_allocation(&version(1, 0, Some("ABC123"))));
        assert!(!needs_allocation(&version(1, 0, Some("not-even-base30"))));
    }

    #[test]
    fn fan_out_skips_assigned_and_duplicate_versions() {
        let versions = vec![
            version(1, 0, None),
            version(0, 1, None),
            version(0, 2, Some("00000B")),
            version(1, 0, Some("")),
            version(1, 1, None),
        ];

        let selected: Vec<VersionNumber> = select_fan_out(&versions)
            .into_iter()
            .map(|v| v.version)
            .collect();

        assert_eq!(
            selected,
            vec![
                VersionNumber::new(0, 1),
                VersionNumber::new(1, 0),
                VersionNumber::new(1, 1),
            ]
        );
    }

    #[test]
    fn earliest_valid_identifier_is_established() {
        let versions = vec![
            version(1, 0, None),
            version(0, 3, Some("00000C")),
            version(0, 1, Some("legacy-7")),
            version(0, 2, Some("00000B")),
        ];

        assert_eq!(
            established_identifier(&versions),
            Some(EstablishedIdentifier::Valid {
                version: VersionNumber::new(0, 2),
                identifier: DocumentIdentifier::parse("00000B").unwrap(),
            })
        );
    }

    #[test]
    fn malformed_values_are_reported_when_nothing_valid_exists() {
        let versions = vec![version(0, 2, Some("legacy-9")), version(0, 1, Some("legacy-7"))];

        assert_eq!(
            established_identifier(&versions),
            Some(EstablishedIdentifier::Unrecognized {
                version: VersionNumber::new(0, 1),
                value: "legacy-7",
            })
        );
    }

    #[test]
    fn unassigned_document_has_no_identifier() {
        let versions = vec![version(0, 1, None), version(0, 2, Some("  "))];
        assert_eq!(established_identifier(&versions), None);
    }

    #[test]
    fn claim_outcome_yields_recorded_identifier() {
        let winner = DocumentIdentifier::from_sequence(7).unwrap();
        let mine = DocumentIdentifier::from_sequence(8).unwrap();

        assert_eq!(ClaimOutcome::Won(mine.clone()).identifier(), &mine);
        let lost = ClaimOutcome::Lost {
            winner: winner.clone(),
            discarded: mine,
        };
        assert_eq!(lost.identifier(), &winner);
    }
}
