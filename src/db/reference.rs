//! Reference data write path
//!
//! Colleges, departments, semesters, fields, categories, users and projects
//! are owned by the platform's CRUD services. These upserts exist for the
//! seed loader and for tests; the ledger and statistics code never call them.

use rusqlite::{params, Connection};
use serde::Deserialize;

use super::hierarchy::{self, HierarchyKind};
use super::lifecycle::LifecycleState;
use crate::error::LedgerError;

/// Project row as supplied by the project service
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: i64,
    pub title: String,
    pub owner_id: i64,
    #[serde(default)]
    pub semester_id: Option<i64>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub field_ids: Vec<i64>,
    #[serde(default)]
    pub state: LifecycleState,
}

pub fn upsert_college(
    conn: &Connection,
    id: i64,
    name: &str,
    state: LifecycleState,
) -> Result<(), LedgerError> {
    upsert_node(conn, HierarchyKind::College, id, name, state)
}

/// Upsert any node except departments, which need a college
pub fn upsert_node(
    conn: &Connection,
    kind: HierarchyKind,
    id: i64,
    name: &str,
    state: LifecycleState,
) -> Result<(), LedgerError> {
    if kind == HierarchyKind::Department {
        return Err(LedgerError::InvalidInput(
            "departments must be written with upsert_department".into(),
        ));
    }

    let sql = format!(
        "INSERT INTO {} (id, name, state) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, state = excluded.state",
        kind.table()
    );
    conn.execute(&sql, params![id, name, state])?;
    Ok(())
}

pub fn upsert_department(
    conn: &Connection,
    id: i64,
    college_id: i64,
    name: &str,
    state: LifecycleState,
) -> Result<(), LedgerError> {
    if hierarchy::get_node(conn, HierarchyKind::College, college_id)?.is_none() {
        return Err(LedgerError::NotFound(format!("college {}", college_id)));
    }

    conn.execute(
        "INSERT INTO departments (id, college_id, name, state) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            college_id = excluded.college_id,
            name = excluded.name,
            state = excluded.state",
        params![id, college_id, name, state],
    )?;
    Ok(())
}

pub fn upsert_user(
    conn: &Connection,
    id: i64,
    name: &str,
    department_id: Option<i64>,
    state: LifecycleState,
) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO users (id, name, department_id, state) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            department_id = excluded.department_id,
            state = excluded.state",
        params![id, name, department_id, state],
    )?;
    Ok(())
}

/// Upsert a project and replace its field set
pub fn upsert_project(conn: &Connection, project: &ProjectRecord) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO projects (id, title, owner_id, semester_id, category_id, state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            owner_id = excluded.owner_id,
            semester_id = excluded.semester_id,
            category_id = excluded.category_id,
            state = excluded.state",
        params![
            project.id,
            project.title,
            project.owner_id,
            project.semester_id,
            project.category_id,
            project.state,
        ],
    )?;

    conn.execute(
        "DELETE FROM project_fields WHERE project_id = ?",
        params![project.id],
    )?;
    for field_id in &project.field_ids {
        conn.execute(
            "INSERT OR IGNORE INTO project_fields (project_id, field_id) VALUES (?1, ?2)",
            params![project.id, field_id],
        )?;
    }
    Ok(())
}

/// Move a hierarchy node forward in its lifecycle
pub fn transition_node_state(
    conn: &Connection,
    kind: HierarchyKind,
    id: i64,
    to: LifecycleState,
) -> Result<LifecycleState, LedgerError> {
    transition_row(conn, kind.table(), id, to)
}

/// Move a project forward in its lifecycle; ledger rows and counters are untouched
pub fn transition_project_state(
    conn: &Connection,
    id: i64,
    to: LifecycleState,
) -> Result<LifecycleState, LedgerError> {
    transition_row(conn, "projects", id, to)
}

pub fn transition_user_state(
    conn: &Connection,
    id: i64,
    to: LifecycleState,
) -> Result<LifecycleState, LedgerError> {
    transition_row(conn, "users", id, to)
}

fn transition_row(
    conn: &Connection,
    table: &'static str,
    id: i64,
    to: LifecycleState,
) -> Result<LifecycleState, LedgerError> {
    let select = format!("SELECT state FROM {} WHERE id = ?", table);
    let current: LifecycleState = conn
        .query_row(&select, params![id], |row| row.get(0))
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                LedgerError::NotFound(format!("{} {}", table, id))
            }
            other => LedgerError::Database(other),
        })?;

    let next = current.transition(to)?;
    let update = format!("UPDATE {} SET state = ?1 WHERE id = ?2", table);
    conn.execute(&update, params![next, id])?;
    Ok(next)
}
