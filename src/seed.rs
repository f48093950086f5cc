//! Reference data seeding
//!
//! Loads colleges, departments, semesters, fields, categories, users and
//! projects from a JSON document. The whole document is applied in one
//! transaction, parents before children.

use std::path::Path;

use rusqlite::TransactionBehavior;
use serde::Deserialize;
use tracing::info;

use crate::db::reference::{self, ProjectRecord};
use crate::db::{EngagementDb, HierarchyKind, LifecycleState};
use crate::error::LedgerError;
use crate::services::{EventBus, LedgerEvent};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub state: LifecycleState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentRecord {
    pub id: i64,
    pub college_id: i64,
    pub name: String,
    #[serde(default)]
    pub state: LifecycleState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub department_id: Option<i64>,
    #[serde(default)]
    pub state: LifecycleState,
}

/// Seed document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeedData {
    pub colleges: Vec<NodeRecord>,
    pub departments: Vec<DepartmentRecord>,
    pub semesters: Vec<NodeRecord>,
    pub fields: Vec<NodeRecord>,
    pub categories: Vec<NodeRecord>,
    pub users: Vec<UserRecord>,
    pub projects: Vec<ProjectRecord>,
}

impl SeedData {
    pub fn from_json(json: &str) -> Result<Self, LedgerError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write every record; nothing is written if any record fails
    pub fn apply(&self, db: &EngagementDb) -> Result<(), LedgerError> {
        db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            for college in &self.colleges {
                reference::upsert_college(&tx, college.id, &college.name, college.state)?;
            }
            for dept in &self.departments {
                reference::upsert_department(&tx, dept.id, dept.college_id, &dept.name, dept.state)?;
            }
            let flat = [
                (HierarchyKind::Semester, &self.semesters),
                (HierarchyKind::Field, &self.fields),
                (HierarchyKind::Category, &self.categories),
            ];
            for (kind, nodes) in flat {
                for node in nodes {
                    reference::upsert_node(&tx, kind, node.id, &node.name, node.state)?;
                }
            }
            for user in &self.users {
                reference::upsert_user(&tx, user.id, &user.name, user.department_id, user.state)?;
            }
            for project in &self.projects {
                reference::upsert_project(&tx, project)?;
            }

            tx.commit()?;
            Ok(())
        })?;

        info!(
            colleges = self.colleges.len(),
            departments = self.departments.len(),
            users = self.users.len(),
            projects = self.projects.len(),
            "Seed data applied"
        );
        Ok(())
    }
}

/// Load and apply a seed file, announcing it on the event bus
pub fn apply_seed_file(db: &EngagementDb, events: &EventBus, path: &Path) -> Result<(), LedgerError> {
    let seed = SeedData::load(path)?;
    seed.apply(db)?;
    events.emit(LedgerEvent::SeedApplied {
        projects: seed.projects.len(),
        users: seed.users.len(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::hierarchy;

    const SEED: &str = r#"{
        "colleges": [{"id": 2, "name": "Engineering"}],
        "departments": [{"id": 5, "collegeId": 2, "name": "CS"}],
        "semesters": [{"id": 1, "name": "2024 Spring"}],
        "fields": [{"id": 4, "name": "AI"}],
        "categories": [{"id": 3, "name": "Capstone", "state": "inactive"}],
        "users": [{"id": 1, "name": "U1", "departmentId": 5}],
        "projects": [
            {"id": 100, "title": "T1", "ownerId": 1, "semesterId": 1, "fieldIds": [4]}
        ]
    }"#;

    #[test]
    fn test_seed_applies_all_records() {
        let db = EngagementDb::open_in_memory().unwrap();
        SeedData::from_json(SEED).unwrap().apply(&db).unwrap();

        db.with_conn(|conn| {
            assert_eq!(hierarchy::college_of(conn, 5)?, 2);
            assert_eq!(hierarchy::project_state(conn, 100)?, Some(LifecycleState::Active));
            let category = hierarchy::get_node(conn, HierarchyKind::Category, 3)?.unwrap();
            assert_eq!(category.state, LifecycleState::Inactive);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_seed_is_all_or_nothing() {
        let db = EngagementDb::open_in_memory().unwrap();
        let broken = r#"{
            "colleges": [{"id": 2, "name": "Engineering"}],
            "departments": [{"id": 5, "collegeId": 99, "name": "Orphan"}]
        }"#;

        let err = SeedData::from_json(broken).unwrap().apply(&db).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert_eq!(db.stats().unwrap().project_count, 0);
        db.with_conn(|conn| {
            assert!(hierarchy::get_node(conn, HierarchyKind::College, 2)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
