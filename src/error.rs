//! Error types for engagement-ledger

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Target, user or hierarchy id does not resolve to an ACTIVE record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Statistics scope filters contradict each other
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write contention persisted after all retries were spent
    #[error("Write contention on {key} after {attempts} attempts")]
    Contention { key: String, attempts: u32 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled read connection became available in time
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// True for transient SQLite lock errors that a fresh attempt may clear
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
            ),
            LedgerError::Pool(_) => true,
            _ => false,
        }
    }
}
