//! # docid CLI
//!
//! Command-line trigger for identifier assignment, plus codec and status
//! utilities.

use anyhow::{Context, Result};
use docid_agent::mqtt::PublishAckCounter;
use docid_agent::{build_pipeline, AgentConfig, Components, SqliteStore};
use docid_core::DocumentIdentifier;
use std::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How long `assign` waits for the broker to acknowledge queued messages.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "encode" => {
            if args.len() < 3 {
                eprintln!("Usage: docid encode <number>");
                std::process::exit(1);
            }
            let value: u64 = args[2]
                .parse()
                .with_context(|| format!("'{}' is not a non-negative integer", args[2]))?;
            let identifier = DocumentIdentifier::from_sequence(value).context("Failed to encode")?;
            println!("{identifier}");
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: docid decode <identifier>");
                std::process::exit(1);
            }
            let identifier = DocumentIdentifier::parse(&args[2]).context("Failed to decode")?;
            println!("{}", identifier.value());
        }
        "assign" => {
            if args.len() < 3 {
                eprintln!("Usage: docid assign <document-id>");
                std::process::exit(1);
            }
            assign(&args[2]).await?;
        }
        "status" => {
            if args.len() < 3 {
                eprintln!("Usage: docid status <document-id>");
                std::process::exit(1);
            }
            status(&args[2])?;
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Run the pipeline with the latest version of `doc_id` as trigger.
async fn assign(doc_id: &str) -> Result<()> {
    let config = AgentConfig::from_env()?;
    let components = Components::open(&config)?;
    let handle = build_pipeline(&config, &components)?;

    let versions = components
        .client
        .list_document_versions(doc_id, &config.remote.fields.identifier)
        .await
        .context("Failed to list document versions")?;
    let trigger = versions
        .into_iter()
        .max_by_key(|v| v.version)
        .with_context(|| format!("Document {doc_id} has no versions"))?;

    // Poll the broker connection while publishing; the client's request
    // channel is bounded.
    let mut acks = handle
        .mqtt
        .map(|(_, eventloop)| PublishAckCounter::spawn(eventloop));

    let report = handle.pipeline.assign(&trigger).await?;

    if let Some(acks) = acks.as_mut() {
        acks.wait_for(report.queued.len(), ACK_TIMEOUT)
            .await
            .context("Broker did not acknowledge queued messages")?;
    }

    println!("{report}");
    for (version, error) in &report.rejected {
        println!("  rejected {version}: {error}");
    }

    Ok(())
}

/// Print the claimed identifier and queue rows of `doc_id`.
fn status(doc_id: &str) -> Result<()> {
    let config = AgentConfig::from_env()?;
    let store = SqliteStore::open(&config.persistence.db_path).with_context(|| {
        format!(
            "Failed to open SQLite database {}",
            config.persistence.db_path.display()
        )
    })?;

    match store.claimed_identifier(doc_id)? {
        Some(identifier) => println!(
            "document {doc_id}: {identifier} (counter value {})",
            identifier.value()
        ),
        None => println!("document {doc_id}: no identifier claimed"),
    }

    for entry in store.propagation_status(doc_id)? {
        println!(
            "  {:<8} {:<14} attempts={} {}",
            entry.version.to_string(),
            entry.state.as_str(),
            entry.attempts,
            entry.last_error.unwrap_or_default()
        );
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"docid CLI

USAGE:
    docid <COMMAND> [ARGS]

COMMANDS:
    encode <number>         Encode a counter value as a 6-character identifier
    decode <identifier>     Decode an identifier to its counter value
    assign <document-id>    Assign an identifier using the latest version as trigger
    status <document-id>    Show the claimed identifier and queued updates
    help                    Show this help message

Configuration is read from DOCID_* environment variables (see docid-agent).

EXAMPLES:
    docid encode 5
    docid decode 00004G
    DOCID_BASE_URL=https://vault.example.com docid assign 1187
"#
    );
}
