//! SQLite-backed batch store.
//!
//! WAL journal mode keeps flushed batches across a process kill; the
//! connection mutex serialises writes between the spooler and publisher.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::error::SpoolResult;

/// Schema version stored in the metadata table for forward migration.
const SCHEMA_VERSION: u32 = 1;

/// Total on-disk footprint cap, in uncompressed bytes.
pub const MAX_SPOOL_BYTES: u64 = 1024 * 1024 * 1024;

/// Unsent rows evicted per round when eviction is forced onto unsent data.
const FORCED_EVICTION_ROWS: u32 = 10;

/// A stored batch as seen by the publisher.
#[derive(Debug, Clone)]
pub struct SpoolBatch {
    pub id: i64,
    /// Flush wall-clock time (seconds since the UNIX epoch).
    pub timestamp: f64,
    /// Gzip-compressed JSON array of telemetry messages.
    pub payload: Vec<u8>,
    pub uncompressed_size: u64,
    pub sent: bool,
}

/// Snapshot of spool accounting.
#[derive(Debug, Clone, Serialize)]
pub struct SpoolStats {
    pub total_batches: u64,
    pub pending_batches: u64,
    pub sent_batches: u64,
    pub total_size_bytes: u64,
    pub pending_size_bytes: u64,
    pub utilization_percent: f64,
}

/// Durable batch store shared by the spooler and publisher.
pub struct SpoolStore {
    conn: Mutex<Connection>,
    max_bytes: u64,
}

impl SpoolStore {
    /// Open (or create) the spool database at `path`.
    pub fn open(path: impl AsRef<Path>) -> SpoolResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            max_bytes: MAX_SPOOL_BYTES,
        };
        store.initialize()?;
        tracing::info!(path = %path.display(), "opened local spool");
        Ok(store)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> SpoolResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            max_bytes: MAX_SPOOL_BYTES,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Override the footprint cap (tests).
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn initialize(&self) -> SpoolResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS spool_batches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp REAL NOT NULL,
                payload BLOB NOT NULL,
                uncompressed_size INTEGER NOT NULL,
                sent INTEGER NOT NULL DEFAULT 0,
                created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_spool_sent
                ON spool_batches(sent, timestamp);
            CREATE TABLE IF NOT EXISTS spool_metadata (
                key TEXT PRIMARY KEY,
                value TEXT
            );",
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO spool_metadata (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    /// Read the stored schema version.
    pub fn schema_version(&self) -> SpoolResult<Option<u32>> {
        let conn = self.conn.lock().unwrap();
        let version: Option<String> = conn
            .query_row(
                "SELECT value FROM spool_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.and_then(|v| v.parse().ok()))
    }

    /// Insert a flushed batch and enforce the footprint cap.
    pub fn insert_batch(
        &self,
        payload: &[u8],
        uncompressed_size: u64,
        timestamp: f64,
    ) -> SpoolResult<i64> {
        let id = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO spool_batches (timestamp, payload, uncompressed_size, sent, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![timestamp, payload, uncompressed_size as i64, timestamp],
            )?;
            conn.last_insert_rowid()
        };

        self.enforce_cap()?;
        Ok(id)
    }

    /// Oldest unsent batches, by flush timestamp.
    pub fn pending(&self, limit: u32) -> SpoolResult<Vec<SpoolBatch>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, payload, uncompressed_size, sent
             FROM spool_batches
             WHERE sent = 0
             ORDER BY timestamp ASC
             LIMIT ?1",
        )?;

        let batches = stmt
            .query_map(params![limit], |row| {
                Ok(SpoolBatch {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    payload: row.get(2)?,
                    uncompressed_size: row.get::<_, i64>(3)? as u64,
                    sent: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    /// Flip the sent flag after every message in the batch published.
    pub fn mark_sent(&self, id: i64) -> SpoolResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE spool_batches SET sent = 1 WHERE id = ?1", params![id])?;
        tracing::debug!(batch_id = id, "marked batch sent");
        Ok(())
    }

    /// Evict until the footprint is under the cap: oldest sent rows first,
    /// oldest unsent rows (10 at a time, with a loud warning) only when no
    /// sent rows remain.
    fn enforce_cap(&self) -> SpoolResult<()> {
        let conn = self.conn.lock().unwrap();
        loop {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(uncompressed_size), 0) FROM spool_batches",
                [],
                |row| row.get(0),
            )?;
            if (total as u64) <= self.max_bytes {
                return Ok(());
            }

            let evicted_sent = conn.execute(
                "DELETE FROM spool_batches WHERE id IN (
                     SELECT id FROM spool_batches WHERE sent = 1
                     ORDER BY timestamp ASC LIMIT 1
                 )",
                [],
            )?;
            if evicted_sent > 0 {
                tracing::debug!("evicted oldest sent batch to stay under spool cap");
                continue;
            }

            let evicted_unsent = conn.execute(
                "DELETE FROM spool_batches WHERE id IN (
                     SELECT id FROM spool_batches
                     ORDER BY timestamp ASC LIMIT ?1
                 )",
                params![FORCED_EVICTION_ROWS],
            )?;
            if evicted_unsent == 0 {
                return Ok(());
            }
            tracing::warn!(
                evicted = evicted_unsent,
                "spool over cap with no sent batches left; dropped unsent telemetry"
            );
        }
    }

    pub fn stats(&self) -> SpoolResult<SpoolStats> {
        let conn = self.conn.lock().unwrap();
        let (total_batches, total_size): (u64, u64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(uncompressed_size), 0) FROM spool_batches",
            [],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
        )?;
        let (pending_batches, pending_size): (u64, u64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(uncompressed_size), 0)
             FROM spool_batches WHERE sent = 0",
            [],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
        )?;

        Ok(SpoolStats {
            total_batches,
            pending_batches,
            sent_batches: total_batches - pending_batches,
            total_size_bytes: total_size,
            pending_size_bytes: pending_size,
            utilization_percent: total_size as f64 / self.max_bytes as f64 * 100.0,
        })
    }
}
