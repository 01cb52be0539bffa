//! Document identifiers minted from the sequence counter.
//!
//! A [`DocumentIdentifier`] is the six-symbol base-30 rendering of one
//! counter value. It can only be built from a value inside the business
//! range or by parsing a well-formed identifier, so holding one means the
//! encoding already succeeded.

use crate::base30::{self, EncodingError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of base-30 symbols in an identifier.
pub const DOCID_WIDTH: usize = 6;

/// Left-pad character for identifiers.
pub const DOCID_PAD: char = '0';

/// Largest counter value that may be turned into an identifier.
///
/// Equal to `30^6 - 1`, so every accepted value fits in [`DOCID_WIDTH`]
/// symbols.
pub const DOCID_MAX_VALUE: u64 = 728_999_999;

/// An immutable, fixed-width document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentIdentifier {
    value: u64,
    encoded: String,
}

impl DocumentIdentifier {
    /// Build an identifier from a freshly acquired counter value.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::SequenceExhausted`] if `value` exceeds
    /// [`DOCID_MAX_VALUE`].
    pub fn from_sequence(value: u64) -> Result<Self, IdentifierError> {
        if value > DOCID_MAX_VALUE {
            return Err(IdentifierError::SequenceExhausted {
                value,
                max: DOCID_MAX_VALUE,
            });
        }

        let encoded = base30::encode(value, DOCID_WIDTH, DOCID_PAD)?;
        Ok(Self { value, encoded })
    }

    /// Parse an identifier string. Lower-case input is normalized.
    ///
    /// # Errors
    ///
    /// Returns error if the input is not exactly [`DOCID_WIDTH`] valid symbols.
    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        if input.len() != DOCID_WIDTH {
            return Err(IdentifierError::WrongLength {
                input: input.to_string(),
                expected: DOCID_WIDTH,
            });
        }

        let value = base30::decode(input, DOCID_PAD)?;
        Self::from_sequence(value)
    }

    /// The counter value this identifier was minted from.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The encoded form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for DocumentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl FromStr for DocumentIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for DocumentIdentifier {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

impl Serialize for DocumentIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded)
    }
}

impl<'de> Deserialize<'de> for DocumentIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Errors for identifier construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// Counter value is beyond the business ceiling
    #[error("identifier sequence exceeded maximum {max} (counter value {value})")]
    SequenceExhausted {
        /// Counter value that was acquired
        value: u64,
        /// Configured ceiling
        max: u64,
    },
    /// Parsed input has the wrong length
    #[error("identifier {input:?} must be {expected} characters")]
    WrongLength {
        /// Rejected input
        input: String,
        /// Required length
        expected: usize,
    },
    /// Base-30 codec failure
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_matches_width() {
        assert_eq!(Some(DOCID_MAX_VALUE), base30::max_for_width(DOCID_WIDTH));
    }

    #[test]
    fn mint_from_counter_value() {
        let id = DocumentIdentifier::from_sequence(5).unwrap();
        assert_eq!(id.as_str(), "000005");
        assert_eq!(id.value(), 5);
        assert_eq!(id.to_string(), "000005");

        let top = DocumentIdentifier::from_sequence(DOCID_MAX_VALUE).unwrap();
        assert_eq!(top.as_str(), "ZZZZZZ");
    }

    #[test]
    fn counter_beyond_ceiling_is_exhausted() {
        let err = DocumentIdentifier::from_sequence(729_000_000).unwrap_err();
        assert_eq!(
            err,
            IdentifierError::SequenceExhausted {
                value: 729_000_000,
                max: DOCID_MAX_VALUE,
            }
        );
        assert!(err
            .to_string()
            .contains("identifier sequence exceeded maximum 728999999"));
    }

    #[test]
    fn parse_normalizes_case() {
        let id: DocumentIdentifier = "00bc1z".parse().unwrap();
        assert_eq!(id.as_str(), "00BC1Z");
        assert_eq!(id, DocumentIdentifier::from_sequence(id.value()).unwrap());
    }

    #[test]
    fn parse_rejects_wrong_length_and_symbols() {
        assert!(matches!(
            DocumentIdentifier::parse("12345"),
            Err(IdentifierError::WrongLength { expected: 6, .. })
        ));
        assert!(matches!(
            DocumentIdentifier::parse("ABC123"),
            Err(IdentifierError::Encoding(EncodingError::InvalidSymbol {
                symbol: 'A',
                ..
            }))
        ));
    }

    #[test]
    fn serde_as_plain_string() {
        let id = DocumentIdentifier::from_sequence(31).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"000011\"");

        let back: DocumentIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<DocumentIdentifier>("\"0000I1\"").is_err());
    }
}
