//! # Document API Adapter
//!
//! HTTP client and response handling for the remote document store.
//!
//! ## Response envelope
//!
//! - `responseStatus == "SUCCESS"` is the only success marker
//! - Failures carry a `responseMessage` or a list of `{type, message}` errors
//! - Non-2xx statuses and malformed bodies count as failures too
//!
//! ## Fields
//!
//! Identifier propagation writes exactly two fields per version, the
//! identifier field and the export filename field, both set to the encoded
//! identifier.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod encoding;
pub mod envelope;
pub mod fields;

pub use client::{ClientError, VaultClient, VaultClientConfig};
pub use encoding::{encode_path_segment, quote_literal};
pub use envelope::{ApiErrorEntry, Failure, ResponseEnvelope};
pub use fields::{FieldNameError, FieldNames, FieldUpdate};
