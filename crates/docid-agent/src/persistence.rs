//! `SQLite` persistence layer.
//!
//! One database holds the three pieces of durable state the pipeline needs:
//!
//! - `sequence_counter`: an `AUTOINCREMENT` table whose row ids are the
//!   identifier counter values
//! - `identifier_claims`: at most one identifier per document
//! - `propagation_queue`: queued version updates and their status

use docid_core::{ClaimOutcome, DocumentIdentifier, PropagationState, VersionNumber};
use docid_proto::PropagationMessage;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SEQUENCE_TABLE: &str = "sequence_counter";

/// A queued update claimed by a worker.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Row id
    pub id: i64,
    /// Id handed out when the message was accepted
    pub message_id: String,
    /// Decoded message
    pub message: PropagationMessage,
    /// Attempts including the current one
    pub attempts: u32,
}

/// Status row of one queued update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Id handed out when the message was accepted
    pub message_id: String,
    /// Queue the message was placed on
    pub queue_name: String,
    /// Document identity
    pub doc_id: String,
    /// Target version
    pub version: VersionNumber,
    /// Encoded identifier carried by the message
    pub identifier: String,
    /// Current state
    pub state: PropagationState,
    /// Attempts made so far
    pub attempts: u32,
    /// Error of the last failed attempt
    pub last_error: Option<String>,
}

/// `SQLite`-backed persistence store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), StoreError> {
        self.lock()?.execute_batch(
            r"
            -- Counter values are row ids; AUTOINCREMENT never reuses one
            CREATE TABLE IF NOT EXISTS sequence_counter (
                value INTEGER PRIMARY KEY AUTOINCREMENT,
                acquired_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS identifier_claims (
                doc_id TEXT PRIMARY KEY,
                identifier TEXT NOT NULL,
                claimed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS propagation_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                queue_name TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                major INTEGER NOT NULL,
                minor INTEGER NOT NULL,
                identifier TEXT NOT NULL,
                payload BLOB NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                available_at INTEGER NOT NULL,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_propagation_queue_ready
                ON propagation_queue(queue_name, status, available_at);
            CREATE INDEX IF NOT EXISTS idx_propagation_queue_doc
                ON propagation_queue(doc_id);
            ",
        )?;

        tracing::debug!("Store schema initialized");
        Ok(())
    }

    /// Acquire the next counter value.
    ///
    /// Every call inserts one row; the value is spent even if the caller
    /// later discards it.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub fn next_sequence_value(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sequence_counter (acquired_at) VALUES (?1)",
            [now_ms()],
        )?;
        let value = conn.last_insert_rowid();
        u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative counter {value}")))
    }

    /// Make sure the next counter value is greater than `floor`.
    ///
    /// Never lowers the counter.
    ///
    /// # Errors
    ///
    /// Returns error if the counter bookkeeping cannot be updated.
    pub fn provision_sequence_floor(&self, floor: u64) -> Result<(), StoreError> {
        let floor = to_i64(floor)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = ?1",
                [SEQUENCE_TABLE],
                |row| row.get(0),
            )
            .optional()?;

        match current {
            Some(seq) if seq >= floor => {}
            Some(_) => {
                tx.execute(
                    "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2",
                    params![floor, SEQUENCE_TABLE],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                    params![SEQUENCE_TABLE, floor],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Record `identifier` for `doc_id` unless one is already recorded.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger cannot be read or written.
    pub fn claim_identifier(
        &self,
        doc_id: &str,
        identifier: &DocumentIdentifier,
    ) -> Result<ClaimOutcome, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            r"
            INSERT INTO identifier_claims (doc_id, identifier, claimed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(doc_id) DO NOTHING
            ",
            params![doc_id, identifier.as_str(), now_ms()],
        )?;

        if inserted == 1 {
            return Ok(ClaimOutcome::Won(identifier.clone()));
        }

        let winner: String = conn.query_row(
            "SELECT identifier FROM identifier_claims WHERE doc_id = ?1",
            [doc_id],
            |row| row.get(0),
        )?;

        Ok(ClaimOutcome::Lost {
            winner: parse_stored_identifier(&winner)?,
            discarded: identifier.clone(),
        })
    }

    /// Identifier recorded for `doc_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or the stored value is malformed.
    pub fn claimed_identifier(&self, doc_id: &str) -> Result<Option<DocumentIdentifier>, StoreError> {
        let stored: Option<String> = self
            .lock()?
            .query_row(
                "SELECT identifier FROM identifier_claims WHERE doc_id = ?1",
                [doc_id],
                |row| row.get(0),
            )
            .optional()?;

        stored.as_deref().map(parse_stored_identifier).transpose()
    }

    /// Append a message to a queue in the `pending` state.
    ///
    /// # Errors
    ///
    /// Returns error if the message cannot be encoded or stored.
    pub fn enqueue(
        &self,
        queue_name: &str,
        message_id: &str,
        message: &PropagationMessage,
    ) -> Result<(), StoreError> {
        let payload = message
            .to_cbor()
            .map_err(|e| StoreError::Payload(e.to_string()))?;
        let now = now_ms();

        self.lock()?.execute(
            r"
            INSERT INTO propagation_queue
                (message_id, queue_name, doc_id, major, minor, identifier, payload,
                 status, attempts, available_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9, ?9)
            ",
            params![
                message_id,
                queue_name,
                message.doc_id,
                message.version.major,
                message.version.minor,
                message.identifier.as_str(),
                payload,
                PropagationState::Pending.as_str(),
                now,
            ],
        )?;

        Ok(())
    }

    /// Claim the oldest ready message of a queue and mark it `in_flight`.
    ///
    /// Rows whose payload no longer decodes are dead-lettered and skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the queue cannot be read or updated.
    pub fn claim_next(&self, queue_name: &str) -> Result<Option<QueuedMessage>, StoreError> {
        let now = now_ms();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let claimed = loop {
            let row: Option<(i64, String, Vec<u8>, u32)> = tx
                .query_row(
                    r"
                    SELECT id, message_id, payload, attempts FROM propagation_queue
                    WHERE queue_name = ?1 AND status = ?2 AND available_at <= ?3
                    ORDER BY available_at ASC, id ASC
                    LIMIT 1
                    ",
                    params![queue_name, PropagationState::Pending.as_str(), now],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let Some((id, message_id, payload, attempts)) = row else {
                break None;
            };

            match PropagationMessage::from_cbor(&payload) {
                Ok(message) => {
                    tx.execute(
                        r"
                        UPDATE propagation_queue
                        SET status = ?2, attempts = attempts + 1, updated_at = ?3
                        WHERE id = ?1
                        ",
                        params![id, PropagationState::InFlight.as_str(), now],
                    )?;
                    break Some(QueuedMessage {
                        id,
                        message_id,
                        message,
                        attempts: attempts.saturating_add(1),
                    });
                }
                Err(err) => {
                    tracing::error!(message_id, error = %err, "Undecodable queue payload");
                    tx.execute(
                        r"
                        UPDATE propagation_queue
                        SET status = ?2, last_error = ?3, updated_at = ?4
                        WHERE id = ?1
                        ",
                        params![
                            id,
                            PropagationState::DeadLettered.as_str(),
                            err.to_string(),
                            now
                        ],
                    )?;
                }
            }
        };

        tx.commit()?;
        Ok(claimed)
    }

    /// Mark a claimed message as delivered.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub fn mark_succeeded(&self, id: i64) -> Result<(), StoreError> {
        self.lock()?.execute(
            "UPDATE propagation_queue SET status = ?2, last_error = NULL, updated_at = ?3 WHERE id = ?1",
            params![id, PropagationState::Succeeded.as_str(), now_ms()],
        )?;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// With `retry_at` (epoch milliseconds) the message returns to `pending`
    /// and becomes ready at that time; without it the message is
    /// dead-lettered.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub fn mark_failed(
        &self,
        id: i64,
        error: &str,
        retry_at: Option<i64>,
    ) -> Result<PropagationState, StoreError> {
        let now = now_ms();
        let (state, available_at) = match retry_at {
            Some(at) => (PropagationState::Pending, at),
            None => (PropagationState::DeadLettered, now),
        };

        self.lock()?.execute(
            r"
            UPDATE propagation_queue
            SET status = ?2, last_error = ?3, available_at = ?4, updated_at = ?5
            WHERE id = ?1
            ",
            params![id, state.as_str(), error, available_at, now],
        )?;

        Ok(state)
    }

    /// Return every `in_flight` message to `pending`.
    ///
    /// Called at startup: a message still in flight belongs to a worker that
    /// died before recording an outcome.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub fn recover_in_flight(&self) -> Result<usize, StoreError> {
        let recovered = self.lock()?.execute(
            "UPDATE propagation_queue SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![
                PropagationState::Pending.as_str(),
                now_ms(),
                PropagationState::InFlight.as_str()
            ],
        )?;
        Ok(recovered)
    }

    /// Queue status rows of a document, in version order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub fn propagation_status(&self, doc_id: &str) -> Result<Vec<QueueEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r"
            SELECT message_id, queue_name, doc_id, major, minor, identifier,
                   status, attempts, last_error
            FROM propagation_queue
            WHERE doc_id = ?1
            ORDER BY major ASC, minor ASC, id ASC
            ",
        )?;

        let rows = stmt
            .query_map([doc_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, u32>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(message_id, queue_name, doc_id, major, minor, identifier, status, attempts, last_error)| {
                    let state = PropagationState::from_name(&status)
                        .ok_or_else(|| StoreError::Corrupt(format!("unknown status {status:?}")))?;
                    Ok(QueueEntry {
                        message_id,
                        queue_name,
                        doc_id,
                        version: VersionNumber::new(major, minor),
                        identifier,
                        state,
                        attempts,
                        last_error,
                    })
                },
            )
            .collect()
    }
}

fn parse_stored_identifier(stored: &str) -> Result<DocumentIdentifier, StoreError> {
    DocumentIdentifier::parse(stored)
        .map_err(|e| StoreError::Corrupt(format!("claimed identifier {stored:?}: {e}")))
}

/// Current time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|e| StoreError::Database(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `SQLite` failure
    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),
    /// A previous holder of the connection panicked
    #[error("store connection lock poisoned")]
    Poisoned,
    /// Message could not be encoded for storage
    #[error("invalid queue payload: {0}")]
    Payload(String),
    /// Stored data is not what this code wrote
    #[error("corrupt store data: {0}")]
    Corrupt(String),
}
