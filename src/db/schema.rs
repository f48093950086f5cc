//! Database schema definitions

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::LedgerError;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
///
/// A database written by any other schema version is refused rather than
/// opened with tables this build does not understand.
pub fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    match get_schema_version(conn)? {
        0 => {
            info!("Creating new database schema v{}", SCHEMA_VERSION);
            create_tables(conn)?;
            set_schema_version(conn, SCHEMA_VERSION)
        }
        SCHEMA_VERSION => {
            info!("Database schema is up to date (v{})", SCHEMA_VERSION);
            Ok(())
        }
        other => Err(LedgerError::Internal(format!(
            "Unsupported schema version v{} (this build uses v{})",
            other, SCHEMA_VERSION
        ))),
    }
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, LedgerError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), LedgerError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(REFERENCE_SCHEMA)?;
    conn.execute_batch(LEDGER_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

/// Reference data owned by the platform's CRUD services.
/// This crate only reads it, apart from the seed loader.
const REFERENCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS colleges (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'active'
        CHECK (state IN ('active', 'inactive', 'deleted'))
);

CREATE TABLE IF NOT EXISTS departments (
    id INTEGER PRIMARY KEY NOT NULL,
    college_id INTEGER NOT NULL REFERENCES colleges(id),
    name TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'active'
        CHECK (state IN ('active', 'inactive', 'deleted'))
);

CREATE TABLE IF NOT EXISTS semesters (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'active'
        CHECK (state IN ('active', 'inactive', 'deleted'))
);

CREATE TABLE IF NOT EXISTS fields (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'active'
        CHECK (state IN ('active', 'inactive', 'deleted'))
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'active'
        CHECK (state IN ('active', 'inactive', 'deleted'))
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    department_id INTEGER REFERENCES departments(id),
    state TEXT NOT NULL DEFAULT 'active'
        CHECK (state IN ('active', 'inactive', 'deleted'))
);

-- Projects are the engagement targets
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    owner_id INTEGER NOT NULL REFERENCES users(id),
    semester_id INTEGER REFERENCES semesters(id),
    category_id INTEGER REFERENCES categories(id),
    state TEXT NOT NULL DEFAULT 'active'
        CHECK (state IN ('active', 'inactive', 'deleted'))
);

CREATE TABLE IF NOT EXISTS project_fields (
    project_id INTEGER NOT NULL REFERENCES projects(id),
    field_id INTEGER NOT NULL REFERENCES fields(id),
    PRIMARY KEY (project_id, field_id)
);
"#;

/// Engagement ledger, counter projection and delta log
const LEDGER_SCHEMA: &str = r#"
-- One row per (user, target, action kind); rows are never deleted
CREATE TABLE IF NOT EXISTS engagement_actions (
    user_id INTEGER NOT NULL,
    target_id INTEGER NOT NULL,
    action_kind TEXT NOT NULL
        CHECK (action_kind IN ('like', 'founding_recommend', 'registration_recommend')),
    on_state INTEGER NOT NULL CHECK (on_state IN (0, 1)),
    transitioned_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user_id, target_id, action_kind)
);

-- Denormalized counters, written only together with a ledger transition
CREATE TABLE IF NOT EXISTS target_counters (
    target_id INTEGER PRIMARY KEY NOT NULL,
    like_count INTEGER NOT NULL DEFAULT 0 CHECK (like_count >= 0),
    founding_recommend_count INTEGER NOT NULL DEFAULT 0
        CHECK (founding_recommend_count >= 0),
    registration_recommend_count INTEGER NOT NULL DEFAULT 0
        CHECK (registration_recommend_count >= 0),
    updated_at TEXT NOT NULL
);

-- Append-only history of every counter change.
-- Toggles write +1/-1 with the acting user; reconciliation writes the
-- correction with no user.
CREATE TABLE IF NOT EXISTS counter_deltas (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id INTEGER NOT NULL,
    action_kind TEXT NOT NULL,
    user_id INTEGER,
    delta INTEGER NOT NULL CHECK (delta <> 0),
    source TEXT NOT NULL CHECK (source IN ('toggle', 'reconcile')),
    applied_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_departments_college ON departments(college_id);
CREATE INDEX IF NOT EXISTS idx_users_department ON users(department_id);
CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id);
CREATE INDEX IF NOT EXISTS idx_projects_semester ON projects(semester_id);
CREATE INDEX IF NOT EXISTS idx_projects_category ON projects(category_id);
CREATE INDEX IF NOT EXISTS idx_project_fields_field ON project_fields(field_id);

CREATE INDEX IF NOT EXISTS idx_actions_target ON engagement_actions(target_id, action_kind, on_state);
CREATE INDEX IF NOT EXISTS idx_deltas_target ON counter_deltas(target_id, action_kind);
"#;
