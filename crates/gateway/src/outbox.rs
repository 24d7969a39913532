//! Offline outbox: durable FIFO of commands that could not be delivered
//! while the link was down.
//!
//! Commands are persisted in SQLite (WAL mode) so they survive a process
//! restart. Replay order is the enqueue order, and a row is deleted only
//! after the transport-level send succeeded.
//!
//! # Thread Safety
//!
//! The SQLite connection is not thread-safe; all access is serialized
//! through an internal mutex.

use rusqlite::{params, Connection, OpenFlags};
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use chrono::{DateTime, Utc};
use fleetlink_core::types::{CommandKind, OutboundCommand};

/// Outbox storage errors
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row no longer decodes
    #[error("corrupt outbox row {seq}: {reason}")]
    Corrupt {
        /// Queue position of the offending row
        seq: u64,
        /// What failed to decode
        reason: String,
    },
}

/// A command at rest in the outbox, tagged with its queue position.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    /// Monotonic queue position
    pub seq: u64,
    /// The queued command
    pub command: OutboundCommand,
}

/// Durable FIFO command queue, scoped per process.
pub struct Outbox {
    conn: Mutex<Connection>,
    max_queued: Option<usize>,
}

impl Outbox {
    /// Open (or create) the outbox at `path`. `:memory:` keeps the queue
    /// in-process, which forfeits restart durability.
    pub fn open(path: &str, max_queued: Option<usize>) -> Result<Self, OutboxError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
            conn
        };

        conn.execute(
            "CREATE TABLE IF NOT EXISTS outbox (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                target_driver_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL
            )",
            [],
        )?;

        info!(path, "offline outbox ready");

        Ok(Self {
            conn: Mutex::new(conn),
            max_queued,
        })
    }

    /// Append a command. Returns its queue position without waiting on the
    /// network. When a cap is configured and the queue is full, the oldest
    /// commands are evicted first.
    pub fn enqueue(&self, command: &OutboundCommand) -> Result<u64, OutboxError> {
        let conn = self.conn.lock().unwrap();

        if let Some(max) = self.max_queued {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
            let count = count as usize;
            if count >= max {
                let overflow = count - max + 1;
                conn.execute(
                    "DELETE FROM outbox WHERE seq IN
                     (SELECT seq FROM outbox ORDER BY seq ASC LIMIT ?1)",
                    params![overflow as i64],
                )?;
                warn!(dropped = overflow, max, "outbox full; evicted oldest commands");
            }
        }

        conn.execute(
            "INSERT INTO outbox (target_driver_id, kind, payload, enqueued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                command.target_driver_id,
                command.kind.as_str(),
                serde_json::to_string(&command.payload)?,
                command.enqueued_at.to_rfc3339(),
            ],
        )?;
        let seq = conn.last_insert_rowid() as u64;

        debug!(
            seq,
            driver_id = %command.target_driver_id,
            kind = command.kind.as_str(),
            "command queued"
        );

        Ok(seq)
    }

    /// Number of queued commands.
    pub fn len(&self) -> Result<usize, OutboxError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> Result<bool, OutboxError> {
        Ok(self.len()? == 0)
    }

    /// The oldest queued command, if any.
    pub fn front(&self) -> Result<Option<QueuedCommand>, OutboxError> {
        Ok(self.fetch(Some(1))?.into_iter().next())
    }

    /// Delete a delivered command by queue position.
    pub fn remove(&self, seq: u64) -> Result<(), OutboxError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM outbox WHERE seq = ?1", params![seq as i64])?;
        Ok(())
    }

    /// All queued commands in FIFO order.
    pub fn snapshot(&self) -> Result<Vec<QueuedCommand>, OutboxError> {
        self.fetch(None)
    }

    fn fetch(&self, limit: Option<usize>) -> Result<Vec<QueuedCommand>, OutboxError> {
        let conn = self.conn.lock().unwrap();
        let sql = match limit {
            Some(_) => {
                "SELECT seq, target_driver_id, kind, payload, enqueued_at
                 FROM outbox ORDER BY seq ASC LIMIT ?1"
            }
            None => {
                "SELECT seq, target_driver_id, kind, payload, enqueued_at
                 FROM outbox ORDER BY seq ASC"
            }
        };
        let mut stmt = conn.prepare(sql)?;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(u64, String, String, String, String)> {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        };
        let rows: Vec<(u64, String, String, String, String)> = match limit {
            Some(n) => stmt
                .query_map(params![n as i64], map_row)?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map([], map_row)?
                .collect::<rusqlite::Result<_>>()?,
        };

        rows.into_iter()
            .map(|(seq, target_driver_id, kind, payload, enqueued_at)| {
                let kind = CommandKind::from_str(&kind)
                    .map_err(|reason| OutboxError::Corrupt { seq, reason })?;
                let payload = serde_json::from_str(&payload).map_err(|err| OutboxError::Corrupt {
                    seq,
                    reason: err.to_string(),
                })?;
                let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|err| OutboxError::Corrupt {
                        seq,
                        reason: err.to_string(),
                    })?;
                Ok(QueuedCommand {
                    seq,
                    command: OutboundCommand {
                        target_driver_id,
                        kind,
                        payload,
                        enqueued_at,
                    },
                })
            })
            .collect()
    }
}
