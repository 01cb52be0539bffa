//! # docid Agent
//!
//! Consumes the propagation queue and writes identifiers to document
//! versions. Configuration comes from `DOCID_*` environment variables.

use anyhow::Result;
use docid_agent::{Agent, AgentConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting docid agent");

    let config = AgentConfig::from_env()?;

    tracing::info!(
        base_url = %config.remote.base_url,
        queue = %config.queue.name,
        db_path = %config.persistence.db_path.display(),
        "Configuration loaded"
    );

    let agent = Agent::new(config)?;
    agent.run().await?;

    Ok(())
}
