//! Engagement service - toggle state machine with bounded retries
//!
//! One code path serves every action kind. Each attempt is a single ledger
//! unit of work; a lost race or a busy database is retried against the row
//! that now exists, so a duplicate submit ends as an idempotent no-op.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::db::counters::{self, ReconcileReport};
use crate::db::ledger::{self, ToggleAttempt};
use crate::db::{hierarchy, ActionKind, EngagementAction, EngagementDb, TargetCounterSet, Transition};
use crate::error::LedgerError;

use super::events::{EventBus, LedgerEvent};
use super::hierarchy_index::HierarchyIndex;

/// Retry budget for contended toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_attempts: config.max_toggle_retries.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// On/off state of every action kind for one (user, target) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerState {
    pub user_id: i64,
    pub target_id: i64,
    pub states: BTreeMap<ActionKind, bool>,
}

/// Engagement ledger service
pub struct EngagementService {
    db: Arc<EngagementDb>,
    index: Arc<dyn HierarchyIndex>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
}

impl EngagementService {
    pub fn new(
        db: Arc<EngagementDb>,
        index: Arc<dyn HierarchyIndex>,
        events: Arc<EventBus>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            db,
            index,
            events,
            retry,
        }
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Turn an action on. Already on is a successful no-op.
    pub fn toggle_on(&self, user_id: i64, target_id: i64, kind: ActionKind) -> Result<Transition, LedgerError> {
        self.toggle(user_id, target_id, kind, true)
    }

    /// Turn an action off. Already off, or never on, is a successful no-op.
    pub fn toggle_off(&self, user_id: i64, target_id: i64, kind: ActionKind) -> Result<Transition, LedgerError> {
        self.toggle(user_id, target_id, kind, false)
    }

    fn toggle(
        &self,
        user_id: i64,
        target_id: i64,
        kind: ActionKind,
        desired_on: bool,
    ) -> Result<Transition, LedgerError> {
        // Liveness is checked inside the write transaction, not via the index
        self.with_retries(user_id, target_id, kind, || {
            self.db
                .with_conn_mut(|conn| ledger::toggle(conn, user_id, target_id, kind, desired_on))
        })
    }

    /// Drive `attempt_fn` until it commits, fails hard or runs out of attempts
    fn with_retries<F>(
        &self,
        user_id: i64,
        target_id: i64,
        kind: ActionKind,
        mut attempt_fn: F,
    ) -> Result<Transition, LedgerError>
    where
        F: FnMut() -> Result<ToggleAttempt, LedgerError>,
    {
        for attempt in 1..=self.retry.max_attempts {
            match attempt_fn() {
                Ok(ToggleAttempt::Committed(transition)) => {
                    if let Some(delta) = &transition.delta {
                        self.events.emit(LedgerEvent::ActionToggled {
                            user_id,
                            target_id,
                            action_kind: kind,
                            on_state: transition.on_state,
                            delta: delta.delta,
                        });
                    }
                    return Ok(transition);
                }
                Ok(ToggleAttempt::LostRace) => {
                    debug!(user_id, target_id, kind = %kind, attempt, "Lost write race, retrying");
                }
                Err(e) if e.is_retryable() => {
                    warn!(user_id, target_id, kind = %kind, attempt, error = %e, "Database busy, retrying");
                }
                Err(e) => return Err(e),
            }

            self.events.emit(LedgerEvent::ToggleRetried {
                user_id,
                target_id,
                action_kind: kind,
                attempt,
            });

            if attempt < self.retry.max_attempts {
                std::thread::sleep(self.retry.backoff * attempt);
            }
        }

        Err(LedgerError::Contention {
            key: format!("{}/{}/{}", user_id, target_id, kind),
            attempts: self.retry.max_attempts,
        })
    }

    /// Recompute a target's counters from the ledger
    pub fn reconcile(&self, target_id: i64) -> Result<ReconcileReport, LedgerError> {
        self.ensure_target_known(target_id)?;

        let report = self
            .db
            .with_conn_mut(|conn| counters::reconcile(conn, target_id))?;

        self.events.emit(LedgerEvent::CountersReconciled {
            target_id,
            corrected_kinds: report.drift.len(),
        });

        Ok(report)
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Counters for a target in any lifecycle state
    pub fn counters(&self, target_id: i64) -> Result<TargetCounterSet, LedgerError> {
        self.ensure_target_known(target_id)?;
        self.db.with_conn(|conn| counters::read(conn, target_id))
    }

    /// All ledger rows for a target, on and off
    pub fn history(&self, target_id: i64) -> Result<Vec<EngagementAction>, LedgerError> {
        self.ensure_target_known(target_id)?;
        self.db.with_conn(|conn| ledger::history_for_target(conn, target_id))
    }

    /// Which actions a user currently has on for a target.
    ///
    /// Both sides must be ACTIVE; a deleted target has no toggles to render.
    pub fn viewer_state(&self, user_id: i64, target_id: i64) -> Result<ViewerState, LedgerError> {
        if !self.index.user_is_active(user_id)? {
            return Err(LedgerError::NotFound(format!("user {}", user_id)));
        }
        if !self.index.target_is_active(target_id)? {
            return Err(LedgerError::NotFound(format!("project {}", target_id)));
        }

        let rows = self
            .db
            .with_conn(|conn| ledger::actions_for_pair(conn, user_id, target_id))?;

        let mut states: BTreeMap<ActionKind, bool> =
            ActionKind::ALL.into_iter().map(|k| (k, false)).collect();
        for row in rows {
            states.insert(row.action_kind, row.on_state);
        }

        Ok(ViewerState {
            user_id,
            target_id,
            states,
        })
    }

    /// Soft-deleted targets are still known; only absent ids are rejected
    fn ensure_target_known(&self, target_id: i64) -> Result<(), LedgerError> {
        let state = self
            .db
            .with_conn(|conn| hierarchy::project_state(conn, target_id))?;
        match state {
            Some(_) => Ok(()),
            None => Err(LedgerError::NotFound(format!("project {}", target_id))),
        }
    }
}
