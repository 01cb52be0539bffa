//! Response envelope of the document API.
//!
//! Every response carries a top-level `responseStatus`. Anything other than
//! `"SUCCESS"` is a business failure, described either by a
//! `responseMessage` or by a list of `{type, message}` error entries.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Status marker of a successful response.
pub const SUCCESS: &str = "SUCCESS";

/// One entry of the `errors` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiErrorEntry {
    /// Error type, e.g. `INVALID_DATA`
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Parsed response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// `SUCCESS` or a failure marker
    pub response_status: String,
    /// Optional failure description
    #[serde(default)]
    pub response_message: Option<String>,
    /// Optional structured failures
    #[serde(default)]
    pub errors: Vec<ApiErrorEntry>,
    /// Remaining body fields (`data`, `properties`, ...)
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// The first failure extracted from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// The `responseStatus` value
    pub status: String,
    /// Error type when the failure came from the `errors` list
    pub error_type: Option<String>,
    /// Failure message
    pub message: String,
}

impl ResponseEnvelope {
    /// Parse an envelope from a response body.
    ///
    /// # Errors
    ///
    /// Returns error if the body is not JSON or lacks `responseStatus`.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Whether the status marker is `SUCCESS`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.response_status == SUCCESS
    }

    /// Describe the failure, if any.
    ///
    /// `responseMessage` takes precedence; otherwise the first entry of
    /// `errors` is used.
    #[must_use]
    pub fn failure(&self) -> Option<Failure> {
        if self.is_success() {
            return None;
        }

        if let Some(message) = self
            .response_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
        {
            return Some(Failure {
                status: self.response_status.clone(),
                error_type: None,
                message: message.to_string(),
            });
        }

        let first = self.errors.first();
        Some(Failure {
            status: self.response_status.clone(),
            error_type: first.and_then(|e| e.error_type.clone()),
            message: first
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| format!("response status {}", self.response_status)),
        })
    }

    /// A top-level body field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// The `data` field.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.field("data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope() {
        let envelope = ResponseEnvelope::parse(br#"{"responseStatus":"SUCCESS","id":1187}"#).unwrap();
        assert!(envelope.is_success());
        assert!(envelope.failure().is_none());
        assert_eq!(envelope.field("id"), Some(&serde_json::json!(1187)));
    }

    #[test]
    fn failure_with_message() {
        let envelope = ResponseEnvelope::parse(
            br#"{"responseStatus":"FAILURE","responseMessage":"field locked"}"#,
        )
        .unwrap();

        let failure = envelope.failure().unwrap();
        assert_eq!(failure.status, "FAILURE");
        assert_eq!(failure.message, "field locked");
        assert_eq!(failure.error_type, None);
    }

    #[test]
    fn failure_with_error_list_uses_first_entry() {
        let envelope = ResponseEnvelope::parse(
            br#"{
                "responseStatus":"FAILURE",
                "errors":[
                    {"type":"INVALID_DATA","message":"Invalid value for [newco_document_id__c]"},
                    {"type":"OPERATION_NOT_ALLOWED","message":"second"}
                ]
            }"#,
        )
        .unwrap();

        let failure = envelope.failure().unwrap();
        assert_eq!(failure.error_type.as_deref(), Some("INVALID_DATA"));
        assert_eq!(failure.message, "Invalid value for [newco_document_id__c]");
    }

    #[test]
    fn failure_without_details_names_status() {
        let envelope = ResponseEnvelope::parse(br#"{"responseStatus":"WARNING"}"#).unwrap();
        let failure = envelope.failure().unwrap();
        assert_eq!(failure.message, "response status WARNING");
    }

    #[test]
    fn missing_status_is_malformed() {
        assert!(ResponseEnvelope::parse(br#"{"data":[]}"#).is_err());
        assert!(ResponseEnvelope::parse(b"<html>").is_err());
    }
}
