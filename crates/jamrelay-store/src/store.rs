//! SQLite persistence for the relations the visualization client polls.
//!
//! Every write is an upsert keyed by the table's primary key, so the last
//! committed value wins and no history is kept.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use jamrelay_core::types::{
    ChannelQuality, DEFAULT_CHANNELS, DEFAULT_SEED_CHANNEL, DEFAULT_SEED_NODES,
    NodeChannelAssignment, StoreSnapshot,
};

use crate::error::{Result, StoreError};

/// How long a writer waits on a lock held by another process (the
/// visualization reader) before failing with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Rows written by [`Store::seed`] after a reset.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedPlan {
    pub nodes: Vec<i64>,
    pub node_channel: i64,
    /// Channels that get a `channel_quality` row with quality `0.0`.
    pub channels: Vec<i64>,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            nodes: DEFAULT_SEED_NODES.to_vec(),
            node_channel: DEFAULT_SEED_CHANNEL,
            channels: DEFAULT_CHANNELS.to_vec(),
        }
    }
}

/// SQLite-backed store shared by all connection handlers.
///
/// A single connection sits behind a mutex; each call holds it for one
/// statement (or one batch transaction).
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) a database at the given filesystem path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets the external reader poll while handlers write.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Self::from_connection(conn)
    }

    /// Open an existing database for reading only. No migration runs and
    /// the journal mode is left alone; a database without the relay's
    /// tables fails on the first read.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Create the schema if it does not already exist.
    fn migrate(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS node_channels (
                node_id INTEGER PRIMARY KEY,
                channel INTEGER
            );
            CREATE TABLE IF NOT EXISTS channel_quality (
                channel INTEGER PRIMARY KEY,
                quality REAL
            );",
        )?;
        Ok(())
    }

    /// Drop both tables and recreate them empty.
    pub fn reset(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "DROP TABLE IF EXISTS node_channels;
             DROP TABLE IF EXISTS channel_quality;",
        )?;
        self.migrate()
    }

    /// Write the boot-time rows in one transaction.
    pub fn seed(&self, plan: &SeedPlan) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut node_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO node_channels (node_id, channel) VALUES (?1, ?2)",
            )?;
            for node_id in &plan.nodes {
                node_stmt.execute(params![node_id, plan.node_channel])?;
            }

            let mut channel_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO channel_quality (channel, quality) VALUES (?1, 0.0)",
            )?;
            for channel in &plan.channels {
                channel_stmt.execute(params![channel])?;
            }
        }
        tx.commit()?;
        tracing::debug!(
            nodes = plan.nodes.len(),
            channels = plan.channels.len(),
            "store seeded"
        );
        Ok(())
    }

    /// Record the channel a node is currently on.
    pub fn upsert_node_channel(&self, node_id: i64, channel: i64) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO node_channels (node_id, channel) VALUES (?1, ?2)",
            params![node_id, channel],
        )?;
        Ok(())
    }

    /// Record a batch of quality estimates. Returns the number of rows written.
    pub fn upsert_channel_qualities(&self, rows: &[ChannelQuality]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO channel_quality (channel, quality) VALUES (?1, ?2)",
            )?;
            for row in rows {
                stmt.execute(params![row.channel, row.quality])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn node_channel(&self, node_id: i64) -> Result<Option<i64>> {
        let channel = self
            .lock()?
            .query_row(
                "SELECT channel FROM node_channels WHERE node_id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(channel)
    }

    pub fn channel_quality(&self, channel: i64) -> Result<Option<f64>> {
        let quality = self
            .lock()?
            .query_row(
                "SELECT quality FROM channel_quality WHERE channel = ?1",
                params![channel],
                |row| row.get(0),
            )
            .optional()?;
        Ok(quality)
    }

    /// All node assignments ordered by `node_id`.
    pub fn node_channels(&self) -> Result<Vec<NodeChannelAssignment>> {
        let conn = self.lock()?;
        load_node_channels(&conn)
    }

    /// All quality rows ordered by `channel`.
    pub fn channel_qualities(&self) -> Result<Vec<ChannelQuality>> {
        let conn = self.lock()?;
        load_channel_qualities(&conn)
    }

    /// Both relations read under one lock acquisition.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        let conn = self.lock()?;
        Ok(StoreSnapshot {
            nodes: load_node_channels(&conn)?,
            channels: load_channel_qualities(&conn)?,
        })
    }
}

fn load_node_channels(conn: &Connection) -> Result<Vec<NodeChannelAssignment>> {
    let mut stmt =
        conn.prepare_cached("SELECT node_id, channel FROM node_channels ORDER BY node_id")?;
    let rows = stmt.query_map([], |row| {
        Ok(NodeChannelAssignment {
            node_id: row.get(0)?,
            channel: row.get(1)?,
        })
    })?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

fn load_channel_qualities(conn: &Connection) -> Result<Vec<ChannelQuality>> {
    let mut stmt =
        conn.prepare_cached("SELECT channel, quality FROM channel_quality ORDER BY channel")?;
    let rows = stmt.query_map([], |row| {
        Ok(ChannelQuality {
            channel: row.get(0)?,
            quality: row.get(1)?,
        })
    })?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
