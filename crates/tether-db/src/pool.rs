//! # Database Handle
//!
//! Opens the SQLite database holding Tether's two records and applies the
//! schema.
//!
//! ## Writers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Two Writers, One File                           │
//! │                                                                         │
//! │  store persistence task          PendingQueue::persist                  │
//! │  save_state (every change)       save_queue (every mutation)            │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │  SqlitePool (one connection per writer)                          │   │
//! │  │    busy_timeout: the second writer waits instead of SQLITE_BUSY  │   │
//! │  └──────────────────────────────┬───────────────────────────────────┘   │
//! │                                 ▼                                       │
//! │  tether.db (WAL, synchronous = NORMAL)                                  │
//! │    kv_store: tether.network_state, tether.pending_operations            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A crash mid-write leaves the previous record intact: WAL commits are
//! atomic and each record is a single row.
//!
//! ## In-Memory Databases
//! An SQLite `:memory:` database lives exactly as long as its connection,
//! so the in-memory pool holds a single connection that never idles out or
//! expires. Clones of the [`Database`] share it.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::kv::KvRepository;

/// One connection for the state writer, one for the queue writer.
const FILE_CONNECTIONS: u32 = 2;

/// Default wait for a lock held by the other writer.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Where the records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// A database file, created if missing.
    File(PathBuf),
    /// A private in-memory database (tests, `netwatch --in-memory`).
    Memory,
}

impl fmt::Display for DbLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbLocation::File(path) => write!(f, "{}", path.display()),
            DbLocation::Memory => f.write_str(":memory:"),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: DbLocation,

    /// How long a writer waits on a locked database before failing.
    /// Default: 5 seconds
    pub busy_timeout: Duration,
}

impl DbConfig {
    /// Configures a file database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: DbLocation::File(path.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Configures a private in-memory database.
    pub fn in_memory() -> Self {
        DbConfig {
            location: DbLocation::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.location {
            DbLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            DbLocation::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?,
        };
        Ok(options.busy_timeout(self.busy_timeout))
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        match self.location {
            DbLocation::File(_) => SqlitePoolOptions::new().max_connections(FILE_CONNECTIONS),
            DbLocation::Memory => SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the records database.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database and applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(location = %config.location, "Opening database");

        let pool = config
            .pool_options()
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        migrations::run_migrations(&pool).await?;

        info!(
            location = %config.location,
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "Database ready"
        );
        Ok(Database { pool })
    }

    /// Returns the key/value repository.
    pub fn kv(&self) -> KvRepository {
        KvRepository::new(self.pool.clone())
    }

    /// Closes the pool. Later repository calls fail.
    pub async fn close(&self) {
        info!("Closing database");
        self.pool.close().await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
