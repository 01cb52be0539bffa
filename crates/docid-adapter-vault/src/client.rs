//! HTTP client for the document API.
//!
//! Every call goes through one exchange routine that maps transport failures,
//! non-2xx statuses, malformed bodies and non-`SUCCESS` envelopes onto
//! [`ClientError`]. Callers treat all of them as a failed operation.

use crate::encoding::{encode_path_segment, quote_literal};
use crate::envelope::ResponseEnvelope;
use crate::fields::{FieldNames, FieldUpdate};
use docid_core::{DocumentVersion, VersionNumber};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

const MAJOR_VERSION_FIELD: &str = "major_version_number__v";
const MINOR_VERSION_FIELD: &str = "minor_version_number__v";
const NAME_FIELD: &str = "name__v";

/// Document API client configuration.
#[derive(Debug, Clone)]
pub struct VaultClientConfig {
    /// Base URL of the server (e.g., <http://localhost:8080>)
    pub base_url: String,
    /// API version path segment
    pub api_version: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for VaultClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_version: "v19.1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for document API operations.
pub struct VaultClient {
    client: Client,
    config: VaultClientConfig,
}

impl VaultClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: VaultClientConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder().timeout(config.timeout);
        if config.base_url.starts_with("https://") {
            builder = builder.use_rustls_tls();
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &VaultClientConfig {
        &self.config
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            path
        )
    }

    /// Send a request and classify the response.
    async fn send(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<ResponseEnvelope, ClientError> {
        let response = request
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        tracing::debug!(
            operation,
            status = status.as_u16(),
            body_len = body.len(),
            "Response received"
        );

        if !status.is_success() {
            let message = ResponseEnvelope::parse(&body)
                .ok()
                .and_then(|envelope| envelope.failure())
                .map_or_else(|| String::from_utf8_lossy(&body).into_owned(), |f| f.message);
            return Err(ClientError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let envelope =
            ResponseEnvelope::parse(&body).map_err(|e| ClientError::Parse(e.to_string()))?;

        if let Some(failure) = envelope.failure() {
            return Err(ClientError::Rejected {
                status: failure.status,
                error_type: failure.error_type,
                message: failure.message,
            });
        }

        Ok(envelope)
    }

    /// Set fields on one document version.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-2xx status, malformed
    /// response, or a non-`SUCCESS` envelope.
    pub async fn update_document_fields(
        &self,
        doc_id: &str,
        version: VersionNumber,
        update: &FieldUpdate<'_>,
    ) -> Result<(), ClientError> {
        let url = self.api_url(&format!(
            "objects/documents/{}/versions/{}/{}",
            encode_path_segment(doc_id),
            version.major,
            version.minor
        ));

        tracing::debug!(doc_id, %version, url, "PUT document version fields");

        let pairs = update.form_pairs();
        let request = self.client.put(&url).form(&pairs[..]);
        self.send(request, "update_document_fields").await?;

        Ok(())
    }

    /// Run a query and return its `data` rows.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn query(&self, statement: &str) -> Result<Vec<Value>, ClientError> {
        let url = self.api_url("query");

        tracing::debug!(statement, "POST query");

        let params = [("q", statement)];
        let request = self.client.post(&url).form(&params[..]);
        let envelope = self.send(request, "query").await?;

        match envelope.data() {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(other) => Err(ClientError::Parse(format!(
                "query data is not an array: {other}"
            ))),
        }
    }

    /// List every version of a document with its identifier field.
    ///
    /// # Errors
    ///
    /// Returns error if the document id is not numeric, on network or API
    /// errors, or if a row lacks version numbers.
    pub async fn list_document_versions(
        &self,
        doc_id: &str,
        identifier_field: &str,
    ) -> Result<Vec<DocumentVersion>, ClientError> {
        if doc_id.is_empty() || !doc_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClientError::InvalidArgument(format!(
                "document id {doc_id:?} is not numeric"
            )));
        }
        check_api_name(identifier_field)?;

        let statement = format!(
            "SELECT {MAJOR_VERSION_FIELD}, {MINOR_VERSION_FIELD}, {identifier_field} \
             FROM allversions documents WHERE id = {doc_id}"
        );
        let rows = self.query(&statement).await?;

        rows.iter()
            .map(|row| parse_version_row(doc_id, identifier_field, row))
            .collect()
    }

    /// Create a record of `object` and return its id.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors, or if no id is returned.
    pub async fn create_object_record(&self, object: &str) -> Result<String, ClientError> {
        check_api_name(object)?;
        let url = self.api_url(&format!("vobjects/{object}"));

        tracing::debug!(object, url, "POST object record");

        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        let envelope = self.send(request, "create_object_record").await?;

        envelope
            .data()
            .and_then(|data| data.get("id"))
            .and_then(value_as_string)
            .ok_or_else(|| ClientError::Parse("create response has no data.id".to_string()))
    }

    /// Read the system-generated name of an object record.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn object_record_name(
        &self,
        object: &str,
        record_id: &str,
    ) -> Result<Option<String>, ClientError> {
        check_api_name(object)?;
        let statement = format!(
            "SELECT {NAME_FIELD} FROM {object} WHERE id = {}",
            quote_literal(record_id)
        );
        let rows = self.query(&statement).await?;

        Ok(rows
            .first()
            .and_then(|row| row.get(NAME_FIELD))
            .and_then(value_as_string))
    }

    /// Names of all document properties known to the server.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn document_property_names(&self) -> Result<Vec<String>, ClientError> {
        let url = self.api_url("metadata/objects/documents/properties");

        tracing::debug!(url, "GET document properties");

        let envelope = self
            .send(self.client.get(&url), "document_property_names")
            .await?;

        let properties = envelope
            .field("properties")
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::Parse("response has no properties array".to_string()))?;

        Ok(properties
            .iter()
            .filter_map(|p| p.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Check that the configured fields exist on documents.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownField`] naming the first missing field,
    /// or any error from the metadata call.
    pub async fn ensure_document_fields(&self, names: &FieldNames) -> Result<(), ClientError> {
        let known = self.document_property_names().await?;
        for name in names.names() {
            if !known.iter().any(|k| k == name) {
                return Err(ClientError::UnknownField(name.to_string()));
            }
        }
        Ok(())
    }
}

fn parse_version_row(
    doc_id: &str,
    identifier_field: &str,
    row: &Value,
) -> Result<DocumentVersion, ClientError> {
    let number = |field: &str| {
        row.get(field)
            .and_then(value_as_u32)
            .ok_or_else(|| ClientError::Parse(format!("version row missing {field}: {row}")))
    };

    Ok(DocumentVersion {
        doc_id: doc_id.to_string(),
        version: VersionNumber::new(number(MAJOR_VERSION_FIELD)?, number(MINOR_VERSION_FIELD)?),
        identifier: row.get(identifier_field).and_then(value_as_string),
    })
}

fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn check_api_name(name: &str) -> Result<(), ClientError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(ClientError::InvalidArgument(format!(
            "{name:?} is not a valid API name"
        )))
    }
}

/// Errors that can occur with the document API client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Client initialization failed
    #[error("client init error: {0}")]
    Init(String),
    /// HTTP request failed
    #[error("request error: {0}")]
    Request(String),
    /// API returned an error status
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from API
        message: String,
    },
    /// Response parsing failed
    #[error("parse error: {0}")]
    Parse(String),
    /// Envelope status was not `SUCCESS`
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// `responseStatus` value
        status: String,
        /// Error type from the `errors` list, if any
        error_type: Option<String>,
        /// Failure message
        message: String,
    },
    /// Caller supplied an unusable argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A configured field does not exist on documents
    #[error("unknown document field {0:?}")]
    UnknownField(String),
}

impl ClientError {
    /// Error type reported by the server, if any.
    #[must_use]
    pub fn error_type(&self) -> Option<&str> {
        match self {
            Self::Rejected { error_type, .. } => error_type.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docid_core::DocumentIdentifier;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> VaultClient {
        VaultClient::new(VaultClientConfig {
            base_url: server.uri(),
            ..VaultClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn config_default() {
        let config = VaultClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.api_version, "v19.1");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn api_url_trims_trailing_slash() {
        let client = VaultClient::new(VaultClientConfig {
            base_url: "http://vault.local/".to_string(),
            ..VaultClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.api_url("query"),
            "http://vault.local/api/v19.1/query"
        );
    }

    #[tokio::test]
    async fn update_sets_both_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v19.1/objects/documents/1187/versions/1/2"))
            .and(body_string_contains("newco_document_id__c=000005"))
            .and(body_string_contains("export_filename__v=000005"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"responseStatus": "SUCCESS", "id": 1187})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let names = FieldNames::default();
        let identifier = DocumentIdentifier::from_sequence(5).unwrap();
        let update = FieldUpdate::new(&names, &identifier);

        client_for(&server)
            .update_document_fields("1187", VersionNumber::new(1, 2), &update)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_failure_message_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responseStatus": "FAILURE",
                "responseMessage": "field locked"
            })))
            .mount(&server)
            .await;

        let names = FieldNames::default();
        let identifier = DocumentIdentifier::from_sequence(5).unwrap();
        let update = FieldUpdate::new(&names, &identifier);

        let err = client_for(&server)
            .update_document_fields("1187", VersionNumber::new(0, 1), &update)
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            ClientError::Rejected { message, .. } if message == "field locked"
        ));
    }

    #[tokio::test]
    async fn update_failure_error_list_surfaces_type() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responseStatus": "FAILURE",
                "errors": [{"type": "INVALID_DATA", "message": "bad value"}]
            })))
            .mount(&server)
            .await;

        let names = FieldNames::default();
        let identifier = DocumentIdentifier::from_sequence(5).unwrap();
        let update = FieldUpdate::new(&names, &identifier);

        let err = client_for(&server)
            .update_document_fields("1187", VersionNumber::new(0, 1), &update)
            .await
            .unwrap_err();

        assert_eq!(err.error_type(), Some("INVALID_DATA"));
        assert!(err.to_string().contains("bad value"));
    }

    #[tokio::test]
    async fn transport_and_body_failures() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v19.1/objects/documents/1/versions/0/1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v19.1/objects/documents/2/versions/0/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let names = FieldNames::default();
        let identifier = DocumentIdentifier::from_sequence(5).unwrap();
        let update = FieldUpdate::new(&names, &identifier);

        let err = client
            .update_document_fields("1", VersionNumber::new(0, 1), &update)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ApiError { status: 503, .. }));

        let err = client
            .update_document_fields("2", VersionNumber::new(0, 1), &update)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }

    #[tokio::test]
    async fn list_versions_parses_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v19.1/query"))
            .and(body_string_contains("allversions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responseStatus": "SUCCESS",
                "data": [
                    {"major_version_number__v": 0, "minor_version_number__v": 1, "newco_document_id__c": null},
                    {"major_version_number__v": 1, "minor_version_number__v": 0, "newco_document_id__c": "00004G"},
                    {"major_version_number__v": "1", "minor_version_number__v": "1"}
                ]
            })))
            .mount(&server)
            .await;

        let versions = client_for(&server)
            .list_document_versions("1187", "newco_document_id__c")
            .await
            .unwrap();

        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].version, VersionNumber::new(0, 1));
        assert_eq!(versions[0].identifier, None);
        assert_eq!(versions[1].identifier.as_deref(), Some("00004G"));
        assert_eq!(versions[2].version, VersionNumber::new(1, 1));
        assert!(versions.iter().all(|v| v.doc_id == "1187"));
    }

    #[tokio::test]
    async fn list_versions_rejects_non_numeric_id() {
        let client = VaultClient::new(VaultClientConfig::default()).unwrap();
        let err = client
            .list_document_versions("1 OR 1=1", "newco_document_id__c")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn create_record_and_read_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v19.1/vobjects/newco_doc_id__c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responseStatus": "SUCCESS",
                "data": {"id": "V2Q000000001001", "url": "/api/v19.1/vobjects/newco_doc_id__c/V2Q000000001001"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v19.1/query"))
            .and(body_string_contains("V2Q000000001001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responseStatus": "SUCCESS",
                "data": [{"name__v": "000000042"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let id = client.create_object_record("newco_doc_id__c").await.unwrap();
        assert_eq!(id, "V2Q000000001001");

        let name = client
            .object_record_name("newco_doc_id__c", &id)
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("000000042"));
    }

    #[tokio::test]
    async fn ensure_fields_against_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v19.1/metadata/objects/documents/properties"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responseStatus": "SUCCESS",
                "properties": [
                    {"name": "id"},
                    {"name": "newco_document_id__c"},
                    {"name": "export_filename__v"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .ensure_document_fields(&FieldNames::default())
            .await
            .unwrap();

        let missing = FieldNames {
            identifier: "other_id__c".to_string(),
            ..FieldNames::default()
        };
        let err = client.ensure_document_fields(&missing).await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownField(name) if name == "other_id__c"));
    }
}
