//! Engagement ledger
//!
//! Holds the current on/off state of every (user, target, action kind)
//! triple. The triple is the table's primary key, so a second row for the
//! same identity can never be created; state changes go through a
//! compare-and-set update on the previous value.
//!
//! A committed transition and its counter delta always share one
//! `BEGIN IMMEDIATE` transaction (see [`toggle`]).

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::counters::{self, CounterDelta, TargetCounterSet};
use super::current_timestamp;
use super::hierarchy;
use crate::error::LedgerError;

/// Engagement action kinds, one state machine each
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Like,
    FoundingRecommend,
    RegistrationRecommend,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [
        ActionKind::Like,
        ActionKind::FoundingRecommend,
        ActionKind::RegistrationRecommend,
    ];

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Like => "like",
            ActionKind::FoundingRecommend => "founding_recommend",
            ActionKind::RegistrationRecommend => "registration_recommend",
        }
    }

    /// URL path segment (`/engagement/{segment}/on`)
    pub fn path_segment(&self) -> &'static str {
        match self {
            ActionKind::Like => "like",
            ActionKind::FoundingRecommend => "founding-recommend",
            ActionKind::RegistrationRecommend => "registration-recommend",
        }
    }

    pub(crate) fn counter_column(&self) -> &'static str {
        match self {
            ActionKind::Like => "like_count",
            ActionKind::FoundingRecommend => "founding_recommend_count",
            ActionKind::RegistrationRecommend => "registration_recommend_count",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `like`, `founding-recommend`, `founding_recommend` and
/// `FOUNDING_RECOMMEND` style spellings
impl FromStr for ActionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ActionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| LedgerError::Parse(format!("Unknown action kind: {}", s)))
    }
}

impl ToSql for ActionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ActionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: LedgerError| FromSqlError::Other(Box::new(e)))
    }
}

/// Ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementAction {
    pub user_id: i64,
    pub target_id: i64,
    pub action_kind: ActionKind,
    pub on_state: bool,
    pub transitioned_at: String,
    pub created_at: String,
}

/// Result of a toggle request against one identity triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub user_id: i64,
    pub target_id: i64,
    pub action_kind: ActionKind,
    /// State after the request
    pub on_state: bool,
    /// False when the request was a no-op (already in the requested state)
    pub changed: bool,
    /// Delta projected onto the counters, if any
    pub delta: Option<CounterDelta>,
    /// Counters as read inside the same transaction
    pub counters: TargetCounterSet,
}

/// Outcome of one attempt at the ledger unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleAttempt {
    Committed(Transition),
    /// A concurrent writer changed the row first; nothing was written
    LostRace,
}

const ACTION_COLUMNS: &str =
    "user_id, target_id, action_kind, on_state, transitioned_at, created_at";

fn action_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EngagementAction> {
    Ok(EngagementAction {
        user_id: row.get(0)?,
        target_id: row.get(1)?,
        action_kind: row.get(2)?,
        on_state: row.get(3)?,
        transitioned_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// =============================================================================
// Read Operations
// =============================================================================

/// Get the ledger row for one identity triple
pub fn get_action(
    conn: &Connection,
    user_id: i64,
    target_id: i64,
    kind: ActionKind,
) -> Result<Option<EngagementAction>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM engagement_actions
         WHERE user_id = ?1 AND target_id = ?2 AND action_kind = ?3",
        ACTION_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![user_id, target_id, kind], action_from_row)
        .optional()?)
}

/// All rows a user holds on a target (at most one per kind)
pub fn actions_for_pair(
    conn: &Connection,
    user_id: i64,
    target_id: i64,
) -> Result<Vec<EngagementAction>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM engagement_actions
         WHERE user_id = ?1 AND target_id = ?2 ORDER BY action_kind",
        ACTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id, target_id], action_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Full audit history for a target, including off rows.
///
/// Does not look at the target's lifecycle state, so soft-deleted targets
/// stay auditable.
pub fn history_for_target(
    conn: &Connection,
    target_id: i64,
) -> Result<Vec<EngagementAction>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM engagement_actions WHERE target_id = ?1
         ORDER BY transitioned_at, user_id, action_kind",
        ACTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![target_id], action_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Number of rows currently on for (target, kind)
pub fn count_on(conn: &Connection, target_id: i64, kind: ActionKind) -> Result<i64, LedgerError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM engagement_actions
         WHERE target_id = ?1 AND action_kind = ?2 AND on_state = 1",
        params![target_id, kind],
        |row| row.get(0),
    )?)
}

// =============================================================================
// Write Operations
// =============================================================================

/// One attempt at moving a triple to `desired_on`.
///
/// Runs the ledger write and the counter projection in a single immediate
/// transaction. The user and the target must both be ACTIVE at the time the
/// write lock is held, so liveness is checked on the writer connection only.
///
/// Returns [`ToggleAttempt::LostRace`] when the uniqueness constraint or the
/// compare-and-set rejected the write; the caller retries against the row
/// that now exists. SQLite's write lock is held from the read to the write,
/// so with this backend the compare-and-set does not fail; the retry loop in
/// the engagement service still handles the outcome.
pub fn toggle(
    conn: &mut Connection,
    user_id: i64,
    target_id: i64,
    kind: ActionKind,
    desired_on: bool,
) -> Result<ToggleAttempt, LedgerError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    match hierarchy::user_state(&tx, user_id)? {
        Some(state) if state.is_active() => {}
        _ => return Err(LedgerError::NotFound(format!("user {}", user_id))),
    }
    match hierarchy::project_state(&tx, target_id)? {
        Some(state) if state.is_active() => {}
        _ => return Err(LedgerError::NotFound(format!("project {}", target_id))),
    }

    let current = get_action(&tx, user_id, target_id, kind)?.map(|a| a.on_state);

    let is_noop = match current {
        Some(on) => on == desired_on,
        None => !desired_on,
    };

    if is_noop {
        debug!(user_id, target_id, kind = %kind, on = desired_on, "Toggle is a no-op");
        let counters = counters::read(&tx, target_id)?;
        return Ok(ToggleAttempt::Committed(Transition {
            user_id,
            target_id,
            action_kind: kind,
            on_state: current.unwrap_or(false),
            changed: false,
            delta: None,
            counters,
        }));
    }

    let now = current_timestamp();
    let written = match current {
        None => tx.execute(
            "INSERT INTO engagement_actions
                (user_id, target_id, action_kind, on_state, transitioned_at, created_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             ON CONFLICT(user_id, target_id, action_kind) DO NOTHING",
            params![user_id, target_id, kind, now],
        )?,
        Some(previous) => tx.execute(
            "UPDATE engagement_actions SET on_state = ?1, transitioned_at = ?2
             WHERE user_id = ?3 AND target_id = ?4 AND action_kind = ?5 AND on_state = ?6",
            params![desired_on, now, user_id, target_id, kind, previous],
        )?,
    };

    if written == 0 {
        return Ok(ToggleAttempt::LostRace);
    }

    let delta = CounterDelta::for_toggle(target_id, kind, user_id, desired_on);
    counters::apply_delta(&tx, &delta)?;
    let counters = counters::read(&tx, target_id)?;
    tx.commit()?;

    Ok(ToggleAttempt::Committed(Transition {
        user_id,
        target_id,
        action_kind: kind,
        on_state: desired_on,
        changed: true,
        delta: Some(delta),
        counters,
    }))
}
