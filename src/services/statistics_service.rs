//! Statistics service - scope validation and grouped rollups

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::db::statistics::{self, GroupBy, GroupKey, MetricTotals, StatisticsScope};
use crate::db::{EngagementDb, HierarchyKind};
use crate::error::LedgerError;

use super::hierarchy_index::HierarchyIndex;

/// One group of a statistics result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsRow {
    pub group_key: GroupKey,
    pub group_name: Option<String>,
    pub metric_totals: MetricTotals,
}

/// Read-only aggregation over counters and the hierarchy
pub struct StatisticsService {
    db: Arc<EngagementDb>,
    index: Arc<dyn HierarchyIndex>,
}

impl StatisticsService {
    pub fn new(db: Arc<EngagementDb>, index: Arc<dyn HierarchyIndex>) -> Self {
        Self { db, index }
    }

    /// Reject scopes that name inactive nodes or contradict the hierarchy.
    ///
    /// A department filter is checked against a college filter before the
    /// other filters are resolved.
    pub fn validate_scope(&self, scope: &StatisticsScope) -> Result<(), LedgerError> {
        if let Some(department_id) = scope.department_id {
            let owning_college = self.index.college_of(department_id)?;
            if let Some(college_id) = scope.college_id {
                if college_id != owning_college {
                    return Err(LedgerError::InvalidScope(format!(
                        "department {} belongs to college {}, not college {}",
                        department_id, owning_college, college_id
                    )));
                }
            }
        }

        for (kind, id) in scope.filters() {
            if kind == HierarchyKind::Department {
                continue;
            }
            self.index.resolve_active(kind, id)?;
        }

        Ok(())
    }

    /// Aggregate counters over the scope, one row per group
    pub fn aggregate(
        &self,
        scope: &StatisticsScope,
        group_by: GroupBy,
    ) -> Result<Vec<StatisticsRow>, LedgerError> {
        self.validate_scope(scope)?;

        let rows = self.db.with_conn(|conn| {
            // Counters and ledger are read from one snapshot
            let tx = conn.unchecked_transaction()?;

            let subjects = statistics::load_subjects(&tx, scope)?;
            let actions = match group_by {
                GroupBy::User => statistics::load_active_actions(&tx)?,
                _ => Vec::new(),
            };

            let mut rows = Vec::new();
            for (group_key, metric_totals) in statistics::partition(&subjects, &actions, group_by) {
                rows.push(StatisticsRow {
                    group_key,
                    group_name: statistics::group_name(&tx, group_key)?,
                    metric_totals,
                });
            }

            tx.finish()?;
            Ok(rows)
        })?;

        debug!(group_by = ?group_by, groups = rows.len(), "Statistics aggregated");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::reference;
    use crate::db::LifecycleState;
    use crate::services::hierarchy_index::SqliteHierarchyIndex;

    fn service() -> StatisticsService {
        let db = Arc::new(EngagementDb::open_in_memory().unwrap());
        db.with_conn_mut(|conn| {
            reference::upsert_college(conn, 2, "Engineering", LifecycleState::Active)?;
            reference::upsert_college(conn, 9, "Arts", LifecycleState::Active)?;
            reference::upsert_college(conn, 4, "Closed", LifecycleState::Inactive)?;
            reference::upsert_department(conn, 5, 2, "CS", LifecycleState::Active)?;
            Ok(())
        })
        .unwrap();
        let index = Arc::new(SqliteHierarchyIndex::new(db.clone()));
        StatisticsService::new(db, index)
    }

    #[test]
    fn test_department_outside_college_is_invalid() {
        let svc = service();
        let scope = StatisticsScope {
            college_id: Some(9),
            department_id: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            svc.validate_scope(&scope),
            Err(LedgerError::InvalidScope(_))
        ));
    }

    #[test]
    fn test_inactive_filter_node_not_found() {
        let svc = service();
        let scope = StatisticsScope {
            college_id: Some(4),
            ..Default::default()
        };
        assert!(matches!(
            svc.aggregate(&scope, GroupBy::Total),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_empty_scope_yields_zero_total() {
        let svc = service();
        let rows = svc.aggregate(&StatisticsScope::default(), GroupBy::Total).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].group_key, GroupKey::Total);
        assert_eq!(rows[0].metric_totals, MetricTotals::default());
    }
}
