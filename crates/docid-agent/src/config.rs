//! Agent configuration.

use crate::pipeline::FanOutMode;
use crate::worker::RetryPolicy;
use anyhow::{anyhow, bail, Context, Result};
use docid_adapter_vault::{FieldNames, VaultClientConfig};
use docid_proto::DEFAULT_QUEUE_NAME;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent unique identifier; keys the worker's broker session on MQTT
    pub agent_id: Option<Uuid>,

    /// Remote document store configuration
    pub remote: RemoteConfig,

    /// Allocation configuration
    pub allocation: AllocationConfig,

    /// Queue configuration
    pub queue: QueueConfig,

    /// Persistence configuration
    pub persistence: PersistenceConfig,
}

/// Remote document store configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// API base URL
    pub base_url: String,

    /// API version path segment
    pub api_version: String,

    /// Connection name carried in propagation messages
    pub connection: String,

    /// Request timeout
    pub timeout: Duration,

    /// Fields written on each version
    pub fields: FieldNames,

    /// Check at startup that the fields exist
    pub validate_fields: bool,
}

/// Allocation configuration.
#[derive(Debug, Clone)]
pub struct AllocationConfig {
    /// How identifiers reach versions
    pub fan_out: FanOutMode,

    /// Counter backing allocation
    pub sequence_source: SequenceSourceKind,

    /// Autonumber object (for the autonumber source)
    pub autonumber_object: String,

    /// Counter values at or below this are never handed out (`SQLite` source)
    pub sequence_floor: Option<u64>,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue transport
    pub backend: QueueBackend,

    /// Queue name
    pub name: String,

    /// MQTT broker URL (for the MQTT backend)
    pub mqtt_broker: String,

    /// Topic namespace segment
    pub tenant: String,

    /// Attempts before dead-lettering
    pub max_attempts: u32,

    /// Wait after the first failed attempt
    pub retry_backoff: Duration,

    /// Poll interval of the `SQLite` queue
    pub poll_interval: Duration,
}

/// Persistence configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Database path
    pub db_path: PathBuf,
}

/// Counter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSourceKind {
    /// Local `AUTOINCREMENT` table
    Sqlite,
    /// Autonumber object on the remote server
    Autonumber,
}

impl FromStr for SequenceSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "autonumber" => Ok(Self::Autonumber),
            other => Err(format!("unknown sequence source '{other}'")),
        }
    }
}

/// Queue transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// Table in the agent database
    Sqlite,
    /// MQTT broker
    Mqtt,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mqtt" => Ok(Self::Mqtt),
            other => Err(format!("unknown queue backend '{other}'")),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            remote: RemoteConfig {
                base_url: "http://localhost:8080".to_string(),
                api_version: "v19.1".to_string(),
                connection: "local_http_callout_connection".to_string(),
                timeout: Duration::from_secs(30),
                fields: FieldNames::default(),
                validate_fields: true,
            },
            allocation: AllocationConfig {
                fan_out: FanOutMode::Queued,
                sequence_source: SequenceSourceKind::Sqlite,
                autonumber_object: "newco_doc_id__c".to_string(),
                sequence_floor: None,
            },
            queue: QueueConfig {
                backend: QueueBackend::Sqlite,
                name: DEFAULT_QUEUE_NAME.to_string(),
                mqtt_broker: "tcp://localhost:1883".to_string(),
                tenant: "default".to_string(),
                max_attempts: 1,
                retry_backoff: Duration::from_secs(30),
                poll_interval: Duration::from_millis(1000),
            },
            persistence: PersistenceConfig {
                db_path: PathBuf::from("./docid.db"),
            },
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DOCID_AGENT_ID`: Agent UUID
    /// - `DOCID_BASE_URL`, `DOCID_API_VERSION`, `DOCID_HTTP_TIMEOUT_SECS`: remote API
    /// - `DOCID_CONNECTION`: connection name carried in messages
    /// - `DOCID_IDENTIFIER_FIELD`, `DOCID_EXPORT_FIELD`: field names
    /// - `DOCID_VALIDATE_FIELDS`: check field names at startup
    /// - `DOCID_FAN_OUT`: "queued" or "synchronous"
    /// - `DOCID_SEQUENCE_SOURCE`: "sqlite" or "autonumber"
    /// - `DOCID_AUTONUMBER_OBJECT`, `DOCID_SEQUENCE_FLOOR`: counter settings
    /// - `DOCID_QUEUE_BACKEND`: "sqlite" or "mqtt"
    /// - `DOCID_QUEUE_NAME`, `DOCID_MQTT_BROKER`, `DOCID_TENANT`: queue location
    /// - `DOCID_MAX_ATTEMPTS`, `DOCID_RETRY_BACKOFF_SECS`: retry policy
    /// - `DOCID_POLL_INTERVAL_MS`: `SQLite` queue poll interval
    /// - `DOCID_DB_PATH`: `SQLite` database path
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is
    /// inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`AgentConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = lookup("DOCID_AGENT_ID") {
            config.agent_id = Some(Uuid::parse_str(&id).context("Invalid DOCID_AGENT_ID")?);
        }

        let remote = &mut config.remote;
        if let Some(url) = lookup("DOCID_BASE_URL") {
            remote.base_url = url;
        }
        if let Some(version) = lookup("DOCID_API_VERSION") {
            remote.api_version = version;
        }
        if let Some(connection) = lookup("DOCID_CONNECTION") {
            remote.connection = connection;
        }
        if let Some(secs) = parsed::<u64>(&lookup, "DOCID_HTTP_TIMEOUT_SECS")? {
            remote.timeout = Duration::from_secs(secs);
        }
        if let Some(field) = lookup("DOCID_IDENTIFIER_FIELD") {
            remote.fields.identifier = field;
        }
        if let Some(field) = lookup("DOCID_EXPORT_FIELD") {
            remote.fields.export_filename = field;
        }
        if let Some(validate) = parsed::<bool>(&lookup, "DOCID_VALIDATE_FIELDS")? {
            remote.validate_fields = validate;
        }

        let allocation = &mut config.allocation;
        if let Some(mode) = parsed(&lookup, "DOCID_FAN_OUT")? {
            allocation.fan_out = mode;
        }
        if let Some(source) = parsed(&lookup, "DOCID_SEQUENCE_SOURCE")? {
            allocation.sequence_source = source;
        }
        if let Some(object) = lookup("DOCID_AUTONUMBER_OBJECT") {
            allocation.autonumber_object = object;
        }
        allocation.sequence_floor = parsed(&lookup, "DOCID_SEQUENCE_FLOOR")?;

        let queue = &mut config.queue;
        if let Some(backend) = parsed(&lookup, "DOCID_QUEUE_BACKEND")? {
            queue.backend = backend;
        }
        if let Some(name) = lookup("DOCID_QUEUE_NAME") {
            queue.name = name;
        }
        if let Some(mqtt) = lookup("DOCID_MQTT_BROKER") {
            queue.mqtt_broker = mqtt;
        }
        if let Some(tenant) = lookup("DOCID_TENANT") {
            queue.tenant = tenant;
        }
        if let Some(attempts) = parsed(&lookup, "DOCID_MAX_ATTEMPTS")? {
            queue.max_attempts = attempts;
        }
        if let Some(secs) = parsed::<u64>(&lookup, "DOCID_RETRY_BACKOFF_SECS")? {
            queue.retry_backoff = Duration::from_secs(secs);
        }
        if let Some(ms) = parsed::<u64>(&lookup, "DOCID_POLL_INTERVAL_MS")? {
            queue.poll_interval = Duration::from_millis(ms);
        }

        if let Some(db_path) = lookup("DOCID_DB_PATH") {
            config.persistence.db_path = PathBuf::from(db_path);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        self.remote
            .fields
            .validate()
            .context("Invalid field configuration")?;
        if self.queue.max_attempts == 0 {
            bail!("DOCID_MAX_ATTEMPTS must be at least 1");
        }
        if self.remote.connection.trim().is_empty() {
            bail!("DOCID_CONNECTION must not be empty");
        }
        if self.queue.backend == QueueBackend::Mqtt && self.agent_id.is_none() {
            bail!("DOCID_AGENT_ID is required with the mqtt queue backend");
        }
        Ok(())
    }

    /// HTTP client settings.
    #[must_use]
    pub fn client_config(&self) -> VaultClientConfig {
        VaultClientConfig {
            base_url: self.remote.base_url.clone(),
            api_version: self.remote.api_version.clone(),
            timeout: self.remote.timeout,
        }
    }

    /// Broker client id of the queue worker.
    ///
    /// Stable across restarts so the broker keeps the worker's session and
    /// queues messages published while it is offline.
    #[must_use]
    pub fn worker_client_id(&self) -> Option<String> {
        self.agent_id.map(|id| format!("docid-worker-{id}"))
    }

    /// Retry settings of the worker.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.queue.max_attempts,
            base_backoff: self.queue.retry_backoff,
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| anyhow!("Invalid {name}={raw:?}: {e}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AgentConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.remote.base_url, "http://localhost:8080");
        assert_eq!(config.remote.connection, "local_http_callout_connection");
        assert_eq!(config.remote.fields, FieldNames::default());
        assert_eq!(config.allocation.fan_out, FanOutMode::Queued);
        assert_eq!(config.allocation.sequence_source, SequenceSourceKind::Sqlite);
        assert_eq!(config.queue.backend, QueueBackend::Sqlite);
        assert_eq!(config.queue.name, "doc_id_queue");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.persistence.db_path, PathBuf::from("./docid.db"));
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("DOCID_BASE_URL", "https://vault.example.com"),
            ("DOCID_HTTP_TIMEOUT_SECS", "5"),
            ("DOCID_IDENTIFIER_FIELD", "legacy_id__c"),
            ("DOCID_FAN_OUT", "synchronous"),
            ("DOCID_SEQUENCE_SOURCE", "autonumber"),
            ("DOCID_SEQUENCE_FLOOR", "1000"),
            ("DOCID_QUEUE_BACKEND", "mqtt"),
            ("DOCID_AGENT_ID", "6f1c2a9e-3d4b-4c5a-9e8f-0a1b2c3d4e5f"),
            ("DOCID_MAX_ATTEMPTS", "3"),
            ("DOCID_VALIDATE_FIELDS", "false"),
        ])
        .unwrap();

        assert_eq!(config.client_config().base_url, "https://vault.example.com");
        assert_eq!(config.client_config().timeout, Duration::from_secs(5));
        assert_eq!(config.remote.fields.identifier, "legacy_id__c");
        assert!(!config.remote.validate_fields);
        assert_eq!(config.allocation.fan_out, FanOutMode::Synchronous);
        assert_eq!(config.allocation.sequence_source, SequenceSourceKind::Autonumber);
        assert_eq!(config.allocation.sequence_floor, Some(1000));
        assert_eq!(config.queue.backend, QueueBackend::Mqtt);
        assert_eq!(
            config.worker_client_id().as_deref(),
            Some("docid-worker-6f1c2a9e-3d4b-4c5a-9e8f-0a1b2c3d4e5f")
        );
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn mqtt_backend_needs_a_stable_agent_id() {
        let err = load(&[("DOCID_QUEUE_BACKEND", "mqtt")]).unwrap_err();
        assert!(err.to_string().contains("DOCID_AGENT_ID"));
    }

    #[test]
    fn invalid_values_rejected() {
        let err = load(&[("DOCID_MAX_ATTEMPTS", "lots")]).unwrap_err();
        assert!(err.to_string().contains("DOCID_MAX_ATTEMPTS"));

        assert!(load(&[("DOCID_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("DOCID_QUEUE_BACKEND", "kafka")]).is_err());
        assert!(load(&[("DOCID_EXPORT_FIELD", "newco_document_id__c")]).is_err());
        assert!(load(&[("DOCID_AGENT_ID", "not-a-uuid")]).is_err());
    }
}
