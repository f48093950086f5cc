//! Organizational hierarchy lookups
//!
//! Read path over reference data maintained by the platform's CRUD services.
//! Department is the only node with a parent (its college); every other
//! relation is an id held by the referring row.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::lifecycle::LifecycleState;
use crate::error::LedgerError;

/// Hierarchy dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyKind {
    College,
    Department,
    Semester,
    Field,
    Category,
}

impl HierarchyKind {
    pub const ALL: [HierarchyKind; 5] = [
        HierarchyKind::College,
        HierarchyKind::Department,
        HierarchyKind::Semester,
        HierarchyKind::Field,
        HierarchyKind::Category,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyKind::College => "college",
            HierarchyKind::Department => "department",
            HierarchyKind::Semester => "semester",
            HierarchyKind::Field => "field",
            HierarchyKind::Category => "category",
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        match self {
            HierarchyKind::College => "colleges",
            HierarchyKind::Department => "departments",
            HierarchyKind::Semester => "semesters",
            HierarchyKind::Field => "fields",
            HierarchyKind::Category => "categories",
        }
    }
}

impl fmt::Display for HierarchyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HierarchyKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HierarchyKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| LedgerError::Parse(format!("Unknown hierarchy kind: {}", s)))
    }
}

/// College, department, semester, field or category record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub kind: HierarchyKind,
    pub id: i64,
    pub name: String,
    pub state: LifecycleState,
    /// Owning college; set only for departments
    pub college_id: Option<i64>,
}

/// Get a node regardless of lifecycle state
pub fn get_node(
    conn: &Connection,
    kind: HierarchyKind,
    id: i64,
) -> Result<Option<HierarchyNode>, LedgerError> {
    let node = if kind == HierarchyKind::Department {
        conn.query_row(
            "SELECT id, name, state, college_id FROM departments WHERE id = ?",
            params![id],
            |row| {
                Ok(HierarchyNode {
                    kind,
                    id: row.get(0)?,
                    name: row.get(1)?,
                    state: row.get(2)?,
                    college_id: Some(row.get(3)?),
                })
            },
        )
        .optional()?
    } else {
        let sql = format!("SELECT id, name, state FROM {} WHERE id = ?", kind.table());
        conn.query_row(&sql, params![id], |row| {
            Ok(HierarchyNode {
                kind,
                id: row.get(0)?,
                name: row.get(1)?,
                state: row.get(2)?,
                college_id: None,
            })
        })
        .optional()?
    };

    Ok(node)
}

/// Resolve a node that must be ACTIVE
pub fn resolve_active(
    conn: &Connection,
    kind: HierarchyKind,
    id: i64,
) -> Result<HierarchyNode, LedgerError> {
    match get_node(conn, kind, id)? {
        Some(node) if node.state.is_active() => Ok(node),
        _ => Err(LedgerError::NotFound(format!("{} {}", kind, id))),
    }
}

/// Owning college of an ACTIVE department
pub fn college_of(conn: &Connection, department_id: i64) -> Result<i64, LedgerError> {
    let department = resolve_active(conn, HierarchyKind::Department, department_id)?;
    department
        .college_id
        .ok_or_else(|| LedgerError::Internal(format!("department {} has no college", department_id)))
}

/// Lifecycle state of a project (engagement target)
pub fn project_state(conn: &Connection, project_id: i64) -> Result<Option<LifecycleState>, LedgerError> {
    Ok(conn
        .query_row(
            "SELECT state FROM projects WHERE id = ?",
            params![project_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Lifecycle state of a user
pub fn user_state(conn: &Connection, user_id: i64) -> Result<Option<LifecycleState>, LedgerError> {
    Ok(conn
        .query_row(
            "SELECT state FROM users WHERE id = ?",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Display name of a user, any state
pub fn user_name(conn: &Connection, user_id: i64) -> Result<Option<String>, LedgerError> {
    Ok(conn
        .query_row(
            "SELECT name FROM users WHERE id = ?",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::reference;
    use crate::db::EngagementDb;

    fn seeded() -> EngagementDb {
        let db = EngagementDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            reference::upsert_college(conn, 2, "Engineering", LifecycleState::Active)?;
            reference::upsert_department(conn, 5, 2, "Computer Science", LifecycleState::Active)?;
            reference::upsert_department(conn, 6, 2, "Old Department", LifecycleState::Deleted)?;
            reference::upsert_node(conn, HierarchyKind::Semester, 1, "2024-1", LifecycleState::Inactive)?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn test_resolve_active_department() {
        let db = seeded();
        db.with_conn(|conn| {
            let node = resolve_active(conn, HierarchyKind::Department, 5)?;
            assert_eq!(node.name, "Computer Science");
            assert_eq!(node.college_id, Some(2));
            assert_eq!(college_of(conn, 5)?, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_non_active_nodes_are_not_found() {
        let db = seeded();
        db.with_conn(|conn| {
            assert!(matches!(
                resolve_active(conn, HierarchyKind::Department, 6),
                Err(LedgerError::NotFound(_))
            ));
            assert!(matches!(
                resolve_active(conn, HierarchyKind::Semester, 1),
                Err(LedgerError::NotFound(_))
            ));
            assert!(matches!(
                resolve_active(conn, HierarchyKind::Field, 42),
                Err(LedgerError::NotFound(_))
            ));
            // Still readable for history
            assert!(get_node(conn, HierarchyKind::Department, 6)?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("College".parse::<HierarchyKind>().unwrap(), HierarchyKind::College);
        assert!("faculty".parse::<HierarchyKind>().is_err());
    }
}
