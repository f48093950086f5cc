//! SQLite database module for the engagement ledger
//!
//! ## Tables
//!
//! - `engagement_actions` - Ledger of (user, target, action kind) on/off state
//! - `target_counters` - Denormalized per-target counters
//! - `counter_deltas` - Append-only log of every projected counter delta
//! - `colleges`, `departments`, `semesters`, `fields`, `categories`,
//!   `users`, `projects`, `project_fields` - Reference data (read-only here)
//!
//! ## Connections
//!
//! Writes go through a single writer connection. File-backed databases also
//! get an r2d2 pool of `query_only` reader connections, so statistics queries
//! run against their own WAL snapshot and never wait on the writer lock or on
//! each other. In-memory databases have one connection for both paths.

pub mod schema;
pub mod lifecycle;
pub mod hierarchy;
pub mod reference;
pub mod ledger;
pub mod counters;
pub mod statistics;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::LedgerError;

/// Pooled read connections
pub type ReaderPool = Pool<SqliteConnectionManager>;

/// Reader pool size used by [`EngagementDb::open`]
pub const DEFAULT_READER_POOL_SIZE: u32 = 4;

/// SQLite database for ledger, counters and reference data
pub struct EngagementDb {
    writer: Mutex<Connection>,
    readers: Option<ReaderPool>,
}

impl EngagementDb {
    /// Open or create the database file
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, LedgerError> {
        Self::open_with_readers(db_path, busy_timeout, DEFAULT_READER_POOL_SIZE)
    }

    /// Open or create the database file with `reader_pool_size` read connections
    pub fn open_with_readers(
        db_path: &Path,
        busy_timeout: Duration,
        reader_pool_size: u32,
    ) -> Result<Self, LedgerError> {
        info!("Opening SQLite database at {:?}", db_path);

        let writer = Connection::open(db_path)?;
        writer.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        writer.busy_timeout(busy_timeout)?;
        schema::init_schema(&writer)?;

        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA query_only=ON;")
        });
        let readers = Pool::builder()
            .max_size(reader_pool_size.max(1))
            .build(manager)?;

        debug!(readers = reader_pool_size.max(1), "Reader pool ready");

        Ok(Self {
            writer: Mutex::new(writer),
            readers: Some(readers),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;

        Ok(Self {
            writer: Mutex::new(conn),
            readers: None,
        })
    }

    /// Run a read-only operation on a pooled reader connection.
    ///
    /// Never touches the writer lock for file-backed databases.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError>,
    {
        match &self.readers {
            Some(pool) => {
                let conn = pool.get()?;
                f(&conn)
            }
            None => {
                let conn = self
                    .writer
                    .lock()
                    .map_err(|e| LedgerError::Internal(format!("Lock poisoned: {}", e)))?;
                f(&conn)
            }
        }
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Connection) -> Result<T, LedgerError>,
    {
        let mut conn = self
            .writer
            .lock()
            .map_err(|e| LedgerError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

/// Get database statistics
    pub fn stats(&self) -> Result<DbStats, LedgerError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<i64, LedgerError> {
                Ok(conn.query_row(sql, [], |row| row.get(0))?)
            };

            Ok(DbStats {
                project_count: count("SELECT COUNT(*) FROM projects")?,
                user_count: count("SELECT COUNT(*) FROM users")?,
                ledger_rows: count("SELECT COUNT(*) FROM engagement_actions")?,
                active_ledger_rows: count(
                    "SELECT COUNT(*) FROM engagement_actions WHERE on_state = 1",
                )?,
                delta_count: count("SELECT COUNT(*) FROM counter_deltas")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    pub project_count: i64,
    pub user_count: i64,
    pub ledger_rows: i64,
    pub active_ledger_rows: i64,
    pub delta_count: i64,
}

/// Current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// Re-exports
pub use counters::TargetCounterSet;
pub use hierarchy::{HierarchyKind, HierarchyNode};
pub use ledger::{ActionKind, EngagementAction, Transition};
pub use lifecycle::LifecycleState;
pub use statistics::{GroupBy, GroupKey, MetricTotals, StatisticsScope};
