//! SQLite store
//!
//! A small pool of connections to one database file in WAL mode. Writers take
//! the database lock up front with `BEGIN IMMEDIATE`, so two decisions for the
//! same validator serialize inside SQLite rather than in the application.
//! `busy_timeout` bounds how long a statement waits for that lock; a
//! transaction that still finds the database busy is retried a few times by
//! [`TransactionRetryer`] before failing closed.
//!
//! All functions block and must be called from the blocking pool.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{ProtectionError, Result};

/// Schema version written by this build
pub const DATABASE_VERSION: i64 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS database_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    genesis_validators_root BLOB,
    high_watermark_slot INTEGER,
    high_watermark_epoch INTEGER
);

CREATE TABLE IF NOT EXISTS validators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    public_key BLOB NOT NULL UNIQUE,
    enabled BOOLEAN NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS signed_blocks (
    validator_id INTEGER NOT NULL REFERENCES validators(id),
    slot INTEGER NOT NULL,
    signing_root BLOB,
    UNIQUE (validator_id, slot)
);

CREATE TABLE IF NOT EXISTS signed_attestations (
    validator_id INTEGER NOT NULL REFERENCES validators(id),
    source_epoch INTEGER NOT NULL,
    target_epoch INTEGER NOT NULL,
    signing_root BLOB,
    UNIQUE (validator_id, target_epoch)
);

CREATE INDEX IF NOT EXISTS signed_attestations_source
    ON signed_attestations (validator_id, source_epoch);

CREATE TABLE IF NOT EXISTS low_watermarks (
    validator_id INTEGER PRIMARY KEY REFERENCES validators(id),
    slot INTEGER,
    source_epoch INTEGER,
    target_epoch INTEGER
);
";

/// Where and how to open the database
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file, created if missing
    pub path: PathBuf,
    /// Open connections
    pub pool_size: usize,
    /// How long a statement waits for a locked database
    pub busy_timeout: Duration,
    /// Attempts per transaction while the database reports busy
    pub max_attempts: u32,
}

impl StoreConfig {
    /// Defaults for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool_size: 4,
            busy_timeout: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

/// Retries whole transactions that fail with a busy or locked database
#[derive(Debug, Clone, Copy)]
pub struct TransactionRetryer {
    max_attempts: u32,
    backoff: Duration,
}

impl TransactionRetryer {
    /// Retry policy with `max_attempts` attempts (at least one).
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `f` in an immediate transaction on `conn`, committing on success.
    pub fn run<T, F>(&self, conn: &mut Connection, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match run_once(conn, &mut f) {
                Err(e) if e.is_busy() && attempt < self.max_attempts => {
                    debug!(attempt, "database busy, retrying transaction");
                    std::thread::sleep(self.backoff * attempt);
                }
                Err(e) if e.is_busy() => {
                    warn!(attempts = attempt, "database busy, giving up");
                    return Err(ProtectionError::RetriesExhausted { attempts: attempt });
                }
                result => return result,
            }
        }
    }
}

fn run_once<T, F>(conn: &mut Connection, f: &mut F) -> Result<T>
where
    F: FnMut(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

struct ConnectionPool {
    idle: Mutex<Vec<Connection>>,
    available: Condvar,
}

impl ConnectionPool {
    fn get(&self) -> PooledConnection<'_> {
        let mut idle = self.idle.lock();
        loop {
            if let Some(conn) = idle.pop() {
                return PooledConnection {
                    pool: self,
                    conn: Some(conn),
                };
            }
            self.available.wait(&mut idle);
        }
    }
}

struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl PooledConnection<'_> {
    fn connection(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or_else(|| ProtectionError::Task {
            message: "pooled connection already returned".to_string(),
        })
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().push(conn);
            self.pool.available.notify_one();
        }
    }
}

/// Pooled access to the protection database
pub struct Store {
    pool: ConnectionPool,
    retryer: TransactionRetryer,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("retryer", &self.retryer)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if needed) the database and check its schema version.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let mut first = open_connection(config)?;
        first.execute_batch("PRAGMA journal_mode = WAL;")?;
        first.execute_batch(SCHEMA_SQL)?;
        check_version(&mut first)?;

        let mut connections = vec![first];
        for _ in 1..config.pool_size.max(1) {
            connections.push(open_connection(config)?);
        }
        info!(
            path = %config.path.display(),
            connections = connections.len(),
            "slashing protection database opened"
        );

        Ok(Self {
            pool: ConnectionPool {
                idle: Mutex::new(connections),
                available: Condvar::new(),
            },
            retryer: TransactionRetryer::new(config.max_attempts, Duration::from_millis(20)),
        })
    }

    /// Run `f` in one immediate transaction, retrying while busy.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let mut pooled = self.pool.get();
        self.retryer.run(pooled.connection()?, f)
    }

    /// Cheap round trip used by health checks.
    pub fn ping(&self) -> Result<()> {
        let mut pooled = self.pool.get();
        pooled
            .connection()?
            .query_row("SELECT version FROM database_version", [], |row| {
                row.get::<_, i64>(0)
            })?;
        Ok(())
    }
}

fn open_connection(config: &StoreConfig) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        &config.path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(config.busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

fn check_version(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let found: Option<i64> = tx
        .query_row("SELECT version FROM database_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    match found {
        None => {
            tx.execute(
                "INSERT INTO database_version (id, version) VALUES (1, ?1)",
                [DATABASE_VERSION],
            )?;
        }
        Some(version) if version == DATABASE_VERSION => {}
        Some(found) => {
            return Err(ProtectionError::VersionMismatch {
                expected: DATABASE_VERSION,
                found,
            })
        }
    }
    tx.commit()?;
    Ok(())
}
