//! Agent runtime orchestration.

use crate::allocator::SequenceAllocator;
use crate::config::{AgentConfig, QueueBackend, SequenceSourceKind};
use crate::mqtt::MqttQueue;
use crate::persistence::SqliteStore;
use crate::pipeline::{AssignmentPipeline, FanOutMode, FanOutTarget};
use crate::queue::{PropagationQueue, SqliteQueue};
use crate::remote::ConnectionRegistry;
use crate::sequence::{AutonumberSequence, SequenceSource, SqliteSequence};
use crate::worker::{QueueDrainer, UpdateResult, VersionUpdateWorker};
use anyhow::{Context, Result};
use docid_adapter_vault::VaultClient;
use docid_proto::{PropagationMessage, QueueChannel, QueueScheme};
use rumqttc::{Event, EventLoop, Packet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared handles every entry point needs.
#[derive(Clone)]
pub struct Components {
    /// Agent database
    pub store: Arc<SqliteStore>,
    /// Remote document store client
    pub client: Arc<VaultClient>,
}

impl Components {
    /// Open the database and build the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns error if either cannot be created.
    pub fn open(config: &AgentConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.persistence.db_path).with_context(|| {
            format!(
                "Failed to open SQLite database {}",
                config.persistence.db_path.display()
            )
        })?;
        let client =
            VaultClient::new(config.client_config()).context("Failed to create API client")?;

        Ok(Self {
            store: Arc::new(store),
            client: Arc::new(client),
        })
    }
}

/// A pipeline plus the MQTT event loop its queue needs, if any.
pub struct PipelineHandle {
    /// The pipeline
    pub pipeline: AssignmentPipeline,
    /// MQTT queue and its event loop when the MQTT backend is configured
    pub mqtt: Option<(Arc<MqttQueue>, EventLoop)>,
}

/// Build the assignment pipeline described by `config`.
///
/// # Errors
///
/// Returns error if the counter cannot be provisioned or the queue cannot be
/// created.
pub fn build_pipeline(config: &AgentConfig, components: &Components) -> Result<PipelineHandle> {
    let source: Arc<dyn SequenceSource> = match config.allocation.sequence_source {
        SequenceSourceKind::Sqlite => {
            if let Some(floor) = config.allocation.sequence_floor {
                components
                    .store
                    .provision_sequence_floor(floor)
                    .context("Failed to provision sequence floor")?;
            }
            Arc::new(SqliteSequence::new(components.store.clone()))
        }
        SequenceSourceKind::Autonumber => Arc::new(AutonumberSequence::new(
            components.client.clone(),
            config.allocation.autonumber_object.clone(),
        )),
    };

    let mut mqtt = None;
    let target = match config.allocation.fan_out {
        FanOutMode::Synchronous => FanOutTarget::Synchronous(components.client.clone()),
        FanOutMode::Queued => {
            let queue: Arc<dyn PropagationQueue> = match config.queue.backend {
                QueueBackend::Sqlite => Arc::new(SqliteQueue::new(
                    components.store.clone(),
                    config.queue.name.clone(),
                )),
                QueueBackend::Mqtt => {
                    let client_id = format!("docid-producer-{}", Uuid::new_v4());
                    let (queue, eventloop) = mqtt_queue(config, &client_id, false)?;
                    let queue = Arc::new(queue);
                    mqtt = Some((queue.clone(), eventloop));
                    queue
                }
            };
            FanOutTarget::Queued(queue)
        }
    };

    let pipeline = AssignmentPipeline::new(
        SequenceAllocator::new(source),
        components.store.clone(),
        components.client.clone(),
        config.remote.fields.clone(),
        config.remote.connection.clone(),
        target,
    );

    Ok(PipelineHandle { pipeline, mqtt })
}

fn mqtt_queue(
    config: &AgentConfig,
    client_id: &str,
    persistent_session: bool,
) -> Result<(MqttQueue, EventLoop)> {
    MqttQueue::new(
        &config.queue.mqtt_broker,
        client_id,
        QueueScheme::new(&config.queue.tenant),
        config.queue.name.clone(),
        persistent_session,
    )
    .context("Failed to create MQTT queue")
}

/// The long-running queue consumer.
pub struct Agent {
    config: AgentConfig,
    components: Components,
}

impl Agent {
    /// Create a new agent.
    ///
    /// # Errors
    ///
    /// Returns error if initialization fails.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let components = Components::open(&config)?;
        Ok(Self { config, components })
    }

    /// Run the agent's main loop until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if startup checks fail or the queue becomes unusable.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting agent runtime");

        let recovered = self
            .components
            .store
            .recover_in_flight()
            .context("Failed to recover in-flight messages")?;
        if recovered > 0 {
            tracing::warn!(recovered, "Returned in-flight messages to pending");
        }

        if self.config.remote.validate_fields {
            self.components
                .client
                .ensure_document_fields(&self.config.remote.fields)
                .await
                .context("Configured document fields are not available")?;
            tracing::info!(
                identifier_field = %self.config.remote.fields.identifier,
                export_field = %self.config.remote.fields.export_filename,
                "Document fields validated"
            );
        }

        let connections = ConnectionRegistry::new()
            .with_connection(self.config.remote.connection.clone(), self.components.client.clone());
        let worker = VersionUpdateWorker::new(connections, self.config.remote.fields.clone());

        match self.config.queue.backend {
            QueueBackend::Sqlite => self.run_sqlite(worker).await?,
            QueueBackend::Mqtt => self.run_mqtt(&worker).await?,
        }

        tracing::info!("Agent stopped");
        Ok(())
    }

    async fn run_sqlite(&self, worker: VersionUpdateWorker) -> Result<()> {
        let drainer = QueueDrainer::new(
            self.components.store.clone(),
            self.config.queue.name.clone(),
            worker,
            self.config.retry_policy(),
        );
        let mut ticker = tokio::time::interval(self.config.queue.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(queue = %self.config.queue.name, "Agent running, press Ctrl+C to stop");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match drainer.drain().await {
                        Ok(summary) if summary.processed() > 0 => {
                            tracing::info!(
                                succeeded = summary.succeeded,
                                retried = summary.retried,
                                dead_lettered = summary.dead_lettered,
                                "Queue drained"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Queue error");
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    async fn run_mqtt(&self, worker: &VersionUpdateWorker) -> Result<()> {
        let client_id = self
            .config
            .worker_client_id()
            .context("DOCID_AGENT_ID is required with the mqtt queue backend")?;
        let (queue, mut eventloop) = mqtt_queue(&self.config, &client_id, true)?;
        let scheme = QueueScheme::new(&self.config.queue.tenant);
        queue.subscribe().await?;

        tracing::info!(
            topic = %queue.work_topic(),
            client_id,
            "Agent running, press Ctrl+C to stop"
        );

        loop {
            tokio::select! {
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            tracing::debug!(
                                topic = %publish.topic,
                                payload_len = publish.payload.len(),
                                "Received queue message"
                            );
                            if !matches!(scheme.parse(&publish.topic), Some((_, QueueChannel::Work))) {
                                continue;
                            }

                            let message = match PropagationMessage::from_cbor(&publish.payload) {
                                Ok(message) => message,
                                Err(err) => {
                                    tracing::warn!(error = %err, "Failed to decode propagation message");
                                    continue;
                                }
                            };

                            if let UpdateResult::Failed { .. } = worker.process(&message).await {
                                if let Err(err) = queue.publish_dead_letter(&message).await {
                                    tracing::error!(
                                        error = %err,
                                        label = %message.label(),
                                        "Failed to dead-letter message"
                                    );
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "MQTT error");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}
