//! Organizational hierarchy index
//!
//! The ledger and the aggregator only see reference data through
//! [`HierarchyIndex`]. The SQLite implementation reads the tables the
//! platform's CRUD services keep up to date.

use std::sync::Arc;

use crate::db::{hierarchy, EngagementDb, HierarchyKind, HierarchyNode};
use crate::error::LedgerError;

/// Read-only, soft-delete-aware lookups into reference data
pub trait HierarchyIndex: Send + Sync {
    /// Resolve an ACTIVE node, or `NotFound`
    fn resolve_active(&self, kind: HierarchyKind, id: i64) -> Result<HierarchyNode, LedgerError>;

    /// Owning college of an ACTIVE department
    fn college_of(&self, department_id: i64) -> Result<i64, LedgerError>;

    /// Whether a project exists and is ACTIVE
    fn target_is_active(&self, target_id: i64) -> Result<bool, LedgerError>;

    /// Whether a user exists and is ACTIVE
    fn user_is_active(&self, user_id: i64) -> Result<bool, LedgerError>;
}

/// [`HierarchyIndex`] over the local SQLite tables
pub struct SqliteHierarchyIndex {
    db: Arc<EngagementDb>,
}

impl SqliteHierarchyIndex {
    pub fn new(db: Arc<EngagementDb>) -> Self {
        Self { db }
    }
}

impl HierarchyIndex for SqliteHierarchyIndex {
    fn resolve_active(&self, kind: HierarchyKind, id: i64) -> Result<HierarchyNode, LedgerError> {
        self.db.with_conn(|conn| hierarchy::resolve_active(conn, kind, id))
    }

    fn college_of(&self, department_id: i64) -> Result<i64, LedgerError> {
        self.db.with_conn(|conn| hierarchy::college_of(conn, department_id))
    }

    fn target_is_active(&self, target_id: i64) -> Result<bool, LedgerError> {
        self.db.with_conn(|conn| {
            Ok(hierarchy::project_state(conn, target_id)?.map_or(false, |s| s.is_active()))
        })
    }

    fn user_is_active(&self, user_id: i64) -> Result<bool, LedgerError> {
        self.db.with_conn(|conn| {
            Ok(hierarchy::user_state(conn, user_id)?.map_or(false, |s| s.is_active()))
        })
    }
}
