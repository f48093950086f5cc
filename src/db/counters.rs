//! Counter projection
//!
//! `target_counters` holds one row per target with a column per action kind.
//! Every change is also appended to `counter_deltas`, so summing the log for a
//! (target, kind) from zero always gives the stored counter.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::current_timestamp;
use super::ledger::{self, ActionKind};
use crate::error::LedgerError;

/// Where a counter change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaSource {
    Toggle,
    Reconcile,
}

impl DeltaSource {
    fn as_str(&self) -> &'static str {
        match self {
            DeltaSource::Toggle => "toggle",
            DeltaSource::Reconcile => "reconcile",
        }
    }
}

/// +1/-1 produced by a ledger transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub target_id: i64,
    pub action_kind: ActionKind,
    pub user_id: i64,
    pub delta: i64,
}

impl CounterDelta {
    pub fn for_toggle(target_id: i64, action_kind: ActionKind, user_id: i64, turned_on: bool) -> Self {
        Self {
            target_id,
            action_kind,
            user_id,
            delta: if turned_on { 1 } else { -1 },
        }
    }
}

/// Denormalized counters for one target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCounterSet {
    pub target_id: i64,
    pub like_count: i64,
    pub founding_recommend_count: i64,
    pub registration_recommend_count: i64,
}

impl TargetCounterSet {
    pub fn empty(target_id: i64) -> Self {
        Self {
            target_id,
            ..Default::default()
        }
    }

    pub fn get(&self, kind: ActionKind) -> i64 {
        match kind {
            ActionKind::Like => self.like_count,
            ActionKind::FoundingRecommend => self.founding_recommend_count,
            ActionKind::RegistrationRecommend => self.registration_recommend_count,
        }
    }

    pub fn total(&self) -> i64 {
        self.like_count + self.founding_recommend_count + self.registration_recommend_count
    }
}

/// Counter vs ledger for one kind, as found by [`reconcile`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindDrift {
    pub action_kind: ActionKind,
    pub counter: i64,
    /// Sum of the delta log
    pub replayed: i64,
    pub ledger: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub target_id: i64,
    pub before: TargetCounterSet,
    pub after: TargetCounterSet,
    /// Kinds whose counter or delta log disagreed with the ledger
    pub drift: Vec<KindDrift>,
}

impl ReconcileReport {
    pub fn corrected(&self) -> bool {
        !self.drift.is_empty()
    }
}

/// Apply a toggle delta. Must run inside the ledger transition's transaction.
pub fn apply_delta(conn: &Connection, delta: &CounterDelta) -> Result<(), LedgerError> {
    if delta.delta != 1 && delta.delta != -1 {
        return Err(LedgerError::InvalidInput(format!(
            "Toggle delta must be +1 or -1, got {}",
            delta.delta
        )));
    }

    apply_change(
        conn,
        delta.target_id,
        delta.action_kind,
        delta.delta,
        Some(delta.user_id),
        DeltaSource::Toggle,
    )
}

fn apply_change(
    conn: &Connection,
    target_id: i64,
    kind: ActionKind,
    amount: i64,
    user_id: Option<i64>,
    source: DeltaSource,
) -> Result<(), LedgerError> {
    let now = current_timestamp();

    conn.execute(
        "INSERT INTO target_counters (target_id, updated_at) VALUES (?1, ?2)
         ON CONFLICT(target_id) DO NOTHING",
        params![target_id, now],
    )?;

    let column = kind.counter_column();
    let sql = format!(
        "UPDATE target_counters SET {col} = {col} + ?1, updated_at = ?2 WHERE target_id = ?3",
        col = column
    );
    conn.execute(&sql, params![amount, now, target_id])
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => LedgerError::Internal(format!(
                "{} for target {} would become negative",
                column, target_id
            )),
            _ => LedgerError::Database(e),
        })?;

    conn.execute(
        "INSERT INTO counter_deltas (target_id, action_kind, user_id, delta, source, applied_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![target_id, kind, user_id, amount, source.as_str(), now],
    )?;

    Ok(())
}

/// Read the counters for a target; a target with no engagement reads as zeros
pub fn read(conn: &Connection, target_id: i64) -> Result<TargetCounterSet, LedgerError> {
    let counters = conn
        .query_row(
            "SELECT target_id, like_count, founding_recommend_count, registration_recommend_count
             FROM target_counters WHERE target_id = ?",
            params![target_id],
            |row| {
                Ok(TargetCounterSet {
                    target_id: row.get(0)?,
                    like_count: row.get(1)?,
                    founding_recommend_count: row.get(2)?,
                    registration_recommend_count: row.get(3)?,
                })
            },
        )
        .optional()?;

    Ok(counters.unwrap_or_else(|| TargetCounterSet::empty(target_id)))
}

/// Sum of the delta log for (target, kind)
pub fn replay(conn: &Connection, target_id: i64, kind: ActionKind) -> Result<i64, LedgerError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(delta), 0) FROM counter_deltas
         WHERE target_id = ?1 AND action_kind = ?2",
        params![target_id, kind],
        |row| row.get(0),
    )?)
}

/// Recompute a target's counters from the ledger's on rows.
///
/// The counter is overwritten with the ledger count, and a `reconcile` entry
/// is appended when the delta log disagrees, so [`replay`] keeps matching the
/// stored counter.
pub fn reconcile(conn: &mut Connection, target_id: i64) -> Result<ReconcileReport, LedgerError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let before = read(&tx, target_id)?;
    let mut drift = Vec::new();
    let now = current_timestamp();

    for kind in ActionKind::ALL {
        let counter = before.get(kind);
        let on_rows = ledger::count_on(&tx, target_id, kind)?;
        let replayed = replay(&tx, target_id, kind)?;

        if counter == on_rows && replayed == on_rows {
            continue;
        }

        warn!(target_id, kind = %kind, counter, replayed, ledger = on_rows, "Counter drift, correcting");

        if counter != on_rows {
            tx.execute(
                "INSERT INTO target_counters (target_id, updated_at) VALUES (?1, ?2)
                 ON CONFLICT(target_id) DO NOTHING",
                params![target_id, now],
            )?;
            let sql = format!(
                "UPDATE target_counters SET {} = ?1, updated_at = ?2 WHERE target_id = ?3",
                kind.counter_column()
            );
            tx.execute(&sql, params![on_rows, now, target_id])?;
        }

        if replayed != on_rows {
            tx.execute(
                "INSERT INTO counter_deltas (target_id, action_kind, user_id, delta, source, applied_at)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5)",
                params![target_id, kind, on_rows - replayed, DeltaSource::Reconcile.as_str(), now],
            )?;
        }

        drift.push(KindDrift {
            action_kind: kind,
            counter,
            replayed,
            ledger: on_rows,
        });
    }

    let after = read(&tx, target_id)?;
    tx.commit()?;

    Ok(ReconcileReport {
        target_id,
        before,
        after,
        drift,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ledger::toggle;
    use crate::db::lifecycle::LifecycleState;
    use crate::db::reference::{self, ProjectRecord};
    use crate::db::EngagementDb;

    fn seeded() -> EngagementDb {
        let db = EngagementDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            for user in 1..=3 {
                reference::upsert_user(conn, user, &format!("u{}", user), None, LifecycleState::Active)?;
            }
            reference::upsert_project(
                conn,
                &ProjectRecord {
                    id: 100,
                    title: "T1".into(),
                    owner_id: 1,
                    semester_id: None,
                    category_id: None,
                    field_ids: vec![],
                    state: LifecycleState::Active,
                },
            )
        })
        .unwrap();
        db
    }

    #[test]
    fn test_unknown_target_reads_zero() {
        let db = seeded();
        let counters = db.with_conn(|conn| read(conn, 555)).unwrap();
        assert_eq!(counters, TargetCounterSet::empty(555));
    }

    #[test]
    fn test_rejects_non_unit_delta() {
        let db = seeded();
        let result = db.with_conn_mut(|conn| {
            apply_delta(
                conn,
                &CounterDelta {
                    target_id: 100,
                    action_kind: ActionKind::Like,
                    user_id: 1,
                    delta: 2,
                },
            )
        });
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn test_counter_never_negative() {
        let db = seeded();
        let result = db.with_conn_mut(|conn| {
            apply_delta(conn, &CounterDelta::for_toggle(100, ActionKind::Like, 1, false))
        });
        assert!(matches!(result, Err(LedgerError::Internal(_))));
    }

    #[test]
    fn test_replay_matches_counter() {
        let db = seeded();
        db.with_conn_mut(|conn| {
            let script = [
                (1, ActionKind::Like, true),
                (2, ActionKind::Like, true),
                (1, ActionKind::Like, false),
                (3, ActionKind::FoundingRecommend, true),
                (2, ActionKind::Like, true),
                (3, ActionKind::Like, true),
                (3, ActionKind::FoundingRecommend, false),
            ];
            for (user, kind, on) in script {
                toggle(conn, user, 100, kind, on)?;
            }

            let counters = read(conn, 100)?;
            assert_eq!(counters.like_count, 2);
            assert_eq!(counters.founding_recommend_count, 0);
            for kind in ActionKind::ALL {
                assert_eq!(replay(conn, 100, kind)?, counters.get(kind));
                assert_eq!(ledger::count_on(conn, 100, kind)?, counters.get(kind));
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_reconcile_repairs_drift() {
        let db = seeded();
        db.with_conn_mut(|conn| {
            toggle(conn, 1, 100, ActionKind::Like, true)?;
            toggle(conn, 2, 100, ActionKind::Like, true)?;
            // Simulate an out-of-band write
            conn.execute("UPDATE target_counters SET like_count = 7 WHERE target_id = 100", [])?;

            let report = reconcile(conn, 100)?;
            assert!(report.corrected());
            assert_eq!(report.before.like_count, 7);
            assert_eq!(report.after.like_count, 2);
            assert_eq!(report.drift.len(), 1);

            // Log was consistent with the ledger, only the counter moved
            assert_eq!(report.drift[0].replayed, 2);
            assert_eq!(replay(conn, 100, ActionKind::Like)?, 2);

            let clean = reconcile(conn, 100)?;
            assert!(!clean.corrected());
            Ok(())
        })
        .unwrap();
    }
}
