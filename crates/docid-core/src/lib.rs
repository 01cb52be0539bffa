//! # docid Core
//!
//! Identifier model for document ID allocation.
//!
//! This crate provides:
//! - Fixed-width base-30 codec with a vowel-free alphabet
//! - `DocumentIdentifier`, the validated six-symbol identifier and its ceiling
//! - Document version model and propagation states
//! - The assignment gate deciding whether a version needs an identifier

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod base30;
pub mod gate;
pub mod identifier;
pub mod version;

pub use base30::EncodingError;
pub use gate::{
    established_identifier, needs_allocation, select_fan_out, ClaimOutcome, EstablishedIdentifier,
};
pub use identifier::{
    DocumentIdentifier, IdentifierError, DOCID_MAX_VALUE, DOCID_PAD, DOCID_WIDTH,
};
pub use version::{version_label, DocumentVersion, PropagationState, VersionNumber};
