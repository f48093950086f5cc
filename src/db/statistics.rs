//! Statistics rollup over projects and their counters
//!
//! Loading applies the scope as one conjunctive SQL predicate over projects.
//! Grouping and ordering happen in [`partition`], which is pure so it can be
//! checked without a database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize, Serializer};

use super::counters::TargetCounterSet;
use super::hierarchy::{self, HierarchyKind};
use super::ledger::ActionKind;
use crate::error::LedgerError;

/// Conjunction of optional dimension filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsScope {
    #[serde(default)]
    pub college_id: Option<i64>,
    #[serde(default)]
    pub department_id: Option<i64>,
    #[serde(default)]
    pub semester_id: Option<i64>,
    #[serde(default)]
    pub field_id: Option<i64>,
    #[serde(default)]
    pub category_id: Option<i64>,
    /// Also aggregate INACTIVE and DELETED projects
    #[serde(default)]
    pub include_inactive: bool,
}

impl StatisticsScope {
    /// Supplied filters as (dimension, id) pairs
    pub fn filters(&self) -> Vec<(HierarchyKind, i64)> {
        [
            (HierarchyKind::College, self.college_id),
            (HierarchyKind::Department, self.department_id),
            (HierarchyKind::Semester, self.semester_id),
            (HierarchyKind::Field, self.field_id),
            (HierarchyKind::Category, self.category_id),
        ]
        .into_iter()
        .filter_map(|(kind, id)| id.map(|id| (kind, id)))
        .collect()
    }
}

/// Grouping dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupBy {
    #[default]
    Total,
    College,
    Department,
    User,
}

impl FromStr for GroupBy {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "total" => Ok(GroupBy::Total),
            "college" => Ok(GroupBy::College),
            "department" => Ok(GroupBy::Department),
            "user" => Ok(GroupBy::User),
            other => Err(LedgerError::Parse(format!("Unknown groupBy: {}", other))),
        }
    }
}

/// Group identity in a statistics result.
///
/// Variant order is the tie-break order when totals are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Total,
    College(i64),
    Department(i64),
    User(i64),
    /// Records with no value for the grouping dimension
    Unassigned,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Total => f.write_str("total"),
            GroupKey::College(id) => write!(f, "college:{}", id),
            GroupKey::Department(id) => write!(f, "department:{}", id),
            GroupKey::User(id) => write!(f, "user:{}", id),
            GroupKey::Unassigned => f.write_str("unassigned"),
        }
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Summed counters for one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricTotals {
    pub project_count: i64,
    pub like_count: i64,
    pub founding_recommend_count: i64,
    pub registration_recommend_count: i64,
}

impl MetricTotals {
    pub fn total(&self) -> i64 {
        self.like_count + self.founding_recommend_count + self.registration_recommend_count
    }

    fn add_project(&mut self, counters: &TargetCounterSet) {
        self.project_count += 1;
        self.like_count += counters.like_count;
        self.founding_recommend_count += counters.founding_recommend_count;
        self.registration_recommend_count += counters.registration_recommend_count;
    }

    fn add_action(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::Like => self.like_count += 1,
            ActionKind::FoundingRecommend => self.founding_recommend_count += 1,
            ActionKind::RegistrationRecommend => self.registration_recommend_count += 1,
        }
    }
}

/// A project that satisfied the scope, with its owner's placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFacts {
    pub project_id: i64,
    pub owner_id: i64,
    pub department_id: Option<i64>,
    pub college_id: Option<i64>,
    pub counters: TargetCounterSet,
}

/// An on row of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveAction {
    pub user_id: i64,
    pub target_id: i64,
    pub action_kind: ActionKind,
}

/// Load every project satisfying all supplied filters.
///
/// College and department filters apply to the owner's department; the field
/// filter matches any of the project's fields. The scope is not validated
/// here.
pub fn load_subjects(
    conn: &Connection,
    scope: &StatisticsScope,
) -> Result<Vec<SubjectFacts>, LedgerError> {
    let sql = "
        SELECT p.id, p.owner_id, u.department_id, d.college_id,
               COALESCE(c.like_count, 0),
               COALESCE(c.founding_recommend_count, 0),
               COALESCE(c.registration_recommend_count, 0)
        FROM projects p
        LEFT JOIN users u ON u.id = p.owner_id
        LEFT JOIN departments d ON d.id = u.department_id
        LEFT JOIN target_counters c ON c.target_id = p.id
        WHERE (?1 = 1 OR p.state = 'active')
          AND (?2 IS NULL OR d.college_id = ?2)
          AND (?3 IS NULL OR u.department_id = ?3)
          AND (?4 IS NULL OR p.semester_id = ?4)
          AND (?5 IS NULL OR p.category_id = ?5)
          AND (?6 IS NULL OR EXISTS (
                SELECT 1 FROM project_fields pf
                WHERE pf.project_id = p.id AND pf.field_id = ?6))
        ORDER BY p.id";

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(
        params![
            scope.include_inactive,
            scope.college_id,
            scope.department_id,
            scope.semester_id,
            scope.category_id,
            scope.field_id,
        ],
        |row| {
            let project_id: i64 = row.get(0)?;
            Ok(SubjectFacts {
                project_id,
                owner_id: row.get(1)?,
                department_id: row.get(2)?,
                college_id: row.get(3)?,
                counters: TargetCounterSet {
                    target_id: project_id,
                    like_count: row.get(4)?,
                    founding_recommend_count: row.get(5)?,
                    registration_recommend_count: row.get(6)?,
                },
            })
        },
    )?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Load all ledger rows that are currently on
pub fn load_active_actions(conn: &Connection) -> Result<Vec<ActiveAction>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT user_id, target_id, action_kind FROM engagement_actions
         WHERE on_state = 1 ORDER BY user_id, target_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ActiveAction {
            user_id: row.get(0)?,
            target_id: row.get(1)?,
            action_kind: row.get(2)?,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Group subjects and order by descending total, then group key.
///
/// USER groups by the acting user, counting that user's on rows against
/// qualifying projects; `project_count` is then the number of distinct
/// projects the user engaged with. TOTAL always yields exactly one row.
pub fn partition(
    subjects: &[SubjectFacts],
    actions: &[ActiveAction],
    group_by: GroupBy,
) -> Vec<(GroupKey, MetricTotals)> {
    let mut groups: BTreeMap<GroupKey, MetricTotals> = BTreeMap::new();

    match group_by {
        GroupBy::Total => {
            let totals = groups.entry(GroupKey::Total).or_default();
            for subject in subjects {
                totals.add_project(&subject.counters);
            }
        }
        GroupBy::College | GroupBy::Department => {
            for subject in subjects {
                let key = match group_by {
                    GroupBy::College => subject.college_id.map(GroupKey::College),
                    _ => subject.department_id.map(GroupKey::Department),
                }
                .unwrap_or(GroupKey::Unassigned);
                groups.entry(key).or_default().add_project(&subject.counters);
            }
        }
        GroupBy::User => {
            let qualifying: HashSet<i64> = subjects.iter().map(|s| s.project_id).collect();
            let mut engaged: HashMap<i64, HashSet<i64>> = HashMap::new();
            for action in actions.iter().filter(|a| qualifying.contains(&a.target_id)) {
                groups
                    .entry(GroupKey::User(action.user_id))
                    .or_default()
                    .add_action(action.action_kind);
                engaged.entry(action.user_id).or_default().insert(action.target_id);
            }
            for (user_id, projects) in engaged {
                if let Some(totals) = groups.get_mut(&GroupKey::User(user_id)) {
                    totals.project_count = projects.len() as i64;
                }
            }
        }
    }

    let mut rows: Vec<(GroupKey, MetricTotals)> = groups.into_iter().collect();
    rows.sort_by(|(ka, ma), (kb, mb)| mb.total().cmp(&ma.total()).then(ka.cmp(kb)));
    rows
}

/// Display name for a group key, resolved regardless of lifecycle state
pub fn group_name(conn: &Connection, key: GroupKey) -> Result<Option<String>, LedgerError> {
    Ok(match key {
        GroupKey::College(id) => {
            hierarchy::get_node(conn, HierarchyKind::College, id)?.map(|n| n.name)
        }
        GroupKey::Department(id) => {
            hierarchy::get_node(conn, HierarchyKind::Department, id)?.map(|n| n.name)
        }
        GroupKey::User(id) => hierarchy::user_name(conn, id)?,
        GroupKey::Total | GroupKey::Unassigned => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(project_id: i64, department: Option<(i64, i64)>, likes: i64) -> SubjectFacts {
        SubjectFacts {
            project_id,
            owner_id: project_id * 10,
            department_id: department.map(|(d, _)| d),
            college_id: department.map(|(_, c)| c),
            counters: TargetCounterSet {
                target_id: project_id,
                like_count: likes,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_total_is_single_row_even_when_empty() {
        let rows = partition(&[], &[], GroupBy::Total);
        assert_eq!(rows, vec![(GroupKey::Total, MetricTotals::default())]);
    }

    #[test]
    fn test_department_rollup_matches_college() {
        let subjects = vec![
            subject(1, Some((5, 2)), 3),
            subject(2, Some((6, 2)), 1),
            subject(3, Some((7, 9)), 4),
            subject(4, None, 2),
        ];

        let by_college: HashMap<GroupKey, MetricTotals> =
            partition(&subjects, &[], GroupBy::College).into_iter().collect();
        let by_department = partition(&subjects, &[], GroupBy::Department);

        let college_2 = by_college[&GroupKey::College(2)];
        let summed: i64 = by_department
            .iter()
            .filter(|(k, _)| matches!(k, GroupKey::Department(5) | GroupKey::Department(6)))
            .map(|(_, m)| m.like_count)
            .sum();
        assert_eq!(summed, college_2.like_count);
        assert_eq!(college_2.project_count, 2);
        assert_eq!(by_college[&GroupKey::Unassigned].like_count, 2);
    }

    #[test]
    fn test_ordering_by_total_then_key() {
        let subjects = vec![
            subject(1, Some((5, 2)), 1),
            subject(2, Some((6, 3)), 4),
            subject(3, Some((7, 1)), 1),
        ];
        let keys: Vec<GroupKey> = partition(&subjects, &[], GroupBy::College)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![GroupKey::College(3), GroupKey::College(1), GroupKey::College(2)]
        );
    }

    #[test]
    fn test_user_grouping_counts_actions_on_qualifying_projects() {
        let subjects = vec![subject(1, None, 2), subject(2, None, 1)];
        let actions = vec![
            ActiveAction { user_id: 7, target_id: 1, action_kind: ActionKind::Like },
            ActiveAction { user_id: 7, target_id: 2, action_kind: ActionKind::Like },
            ActiveAction { user_id: 7, target_id: 2, action_kind: ActionKind::FoundingRecommend },
            ActiveAction { user_id: 8, target_id: 1, action_kind: ActionKind::Like },
            // Not in scope
            ActiveAction { user_id: 9, target_id: 99, action_kind: ActionKind::Like },
        ];

        let rows = partition(&subjects, &actions, GroupBy::User);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, GroupKey::User(7));
        assert_eq!(rows[0].1.like_count, 2);
        assert_eq!(rows[0].1.founding_recommend_count, 1);
        assert_eq!(rows[0].1.project_count, 2);
        assert_eq!(rows[1].0, GroupKey::User(8));
    }

    #[test]
    fn test_group_key_display() {
        assert_eq!(GroupKey::College(2).to_string(), "college:2");
        assert_eq!(GroupKey::Unassigned.to_string(), "unassigned");
        assert_eq!(
            serde_json::to_string(&GroupKey::Department(5)).unwrap(),
            "\"department:5\""
        );
    }

    #[test]
    fn test_scope_filters() {
        let scope = StatisticsScope {
            college_id: Some(2),
            field_id: Some(4),
            ..Default::default()
        };
        assert_eq!(
            scope.filters(),
            vec![(HierarchyKind::College, 2), (HierarchyKind::Field, 4)]
        );
    }
}
