//! Soft-delete lifecycle shared by every reference record
//!
//! Records are never physically removed. The state only moves forward:
//! `active -> inactive -> deleted` (skipping straight to `deleted` is allowed).
//! Reactivation belongs to the reference-data owners, not this crate.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Inactive,
    Deleted,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::Inactive => "inactive",
            LifecycleState::Deleted => "deleted",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Active)
    }

    /// Apply a transition, rejecting any move backwards.
    ///
    /// Moving to the current state is accepted and returns it unchanged.
    pub fn transition(self, to: LifecycleState) -> Result<LifecycleState, LedgerError> {
        if to < self {
            return Err(LedgerError::InvalidInput(format!(
                "Illegal lifecycle transition {} -> {}",
                self, to
            )));
        }
        Ok(to)
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::Active
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(LifecycleState::Active),
            "inactive" => Ok(LifecycleState::Inactive),
            "deleted" => Ok(LifecycleState::Deleted),
            other => Err(LedgerError::Parse(format!("Unknown lifecycle state: {}", other))),
        }
    }
}

impl ToSql for LifecycleState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LifecycleState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: LedgerError| FromSqlError::Other(Box::new(e)))
    }
}
