//! View types for the HTTP API boundary
//!
//! Views serialize camelCase for TypeScript clients and ts-rs generates the
//! matching declarations into `bindings/`. Service types stay snake_case and
//! are converted here.
//!
//! Ids are i64 in storage but travel as plain JSON numbers, so they are
//! declared as `number` on the TypeScript side.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::db::counters::{KindDrift, ReconcileReport};
use crate::db::{ActionKind, EngagementAction, GroupBy, MetricTotals, StatisticsScope, TargetCounterSet, Transition};
use crate::error::LedgerError;
use crate::services::{StatisticsRow, ViewerState};

// ============================================================================
// Toggle Views
// ============================================================================

/// Body of `PUT /engagement/{kind}/on|off`
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ToggleRequestView {
    #[ts(type = "number")]
    pub user_id: i64,
    #[ts(type = "number")]
    pub target_id: i64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CountersView {
    #[ts(type = "number")]
    pub target_id: i64,
    #[ts(type = "number")]
    pub like_count: i64,
    #[ts(type = "number")]
    pub founding_recommend_count: i64,
    #[ts(type = "number")]
    pub registration_recommend_count: i64,
}

impl From<TargetCounterSet> for CountersView {
    fn from(c: TargetCounterSet) -> Self {
        Self {
            target_id: c.target_id,
            like_count: c.like_count,
            founding_recommend_count: c.founding_recommend_count,
            registration_recommend_count: c.registration_recommend_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ToggleResponseView {
    #[ts(type = "number")]
    pub target_id: i64,
    /// LIKE, FOUNDING_RECOMMEND or REGISTRATION_RECOMMEND
    pub action_kind: String,
    pub on_state: bool,
    /// False when the request matched the current state
    pub changed: bool,
    pub counters: CountersView,
}

impl From<Transition> for ToggleResponseView {
    fn from(t: Transition) -> Self {
        Self {
            target_id: t.target_id,
            action_kind: wire_kind(t.action_kind),
            on_state: t.on_state,
            changed: t.changed,
            counters: t.counters.into(),
        }
    }
}

// ============================================================================
// Ledger Views
// ============================================================================

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct EngagementActionView {
    #[ts(type = "number")]
    pub user_id: i64,
    #[ts(type = "number")]
    pub target_id: i64,
    pub action_kind: String,
    pub on_state: bool,
    pub transitioned_at: String,
    pub created_at: String,
}

impl From<EngagementAction> for EngagementActionView {
    fn from(a: EngagementAction) -> Self {
        Self {
            user_id: a.user_id,
            target_id: a.target_id,
            action_kind: wire_kind(a.action_kind),
            on_state: a.on_state,
            transitioned_at: a.transitioned_at,
            created_at: a.created_at,
        }
    }
}

/// Which actions a viewer has on for one target
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ViewerStateView {
    #[ts(type = "number")]
    pub user_id: i64,
    #[ts(type = "number")]
    pub target_id: i64,
    pub liked: bool,
    pub founding_recommended: bool,
    pub registration_recommended: bool,
}

impl From<ViewerState> for ViewerStateView {
    fn from(v: ViewerState) -> Self {
        let on = |kind| v.states.get(&kind).copied().unwrap_or(false);
        Self {
            user_id: v.user_id,
            target_id: v.target_id,
            liked: on(ActionKind::Like),
            founding_recommended: on(ActionKind::FoundingRecommend),
            registration_recommended: on(ActionKind::RegistrationRecommend),
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct KindDriftView {
    pub action_kind: String,
    #[ts(type = "number")]
    pub counter: i64,
    #[ts(type = "number")]
    pub replayed: i64,
    #[ts(type = "number")]
    pub ledger: i64,
}

impl From<KindDrift> for KindDriftView {
    fn from(d: KindDrift) -> Self {
        Self {
            action_kind: wire_kind(d.action_kind),
            counter: d.counter,
            replayed: d.replayed,
            ledger: d.ledger,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ReconcileReportView {
    #[ts(type = "number")]
    pub target_id: i64,
    pub corrected: bool,
    pub before: CountersView,
    pub after: CountersView,
    pub drift: Vec<KindDriftView>,
}

impl From<ReconcileReport> for ReconcileReportView {
    fn from(r: ReconcileReport) -> Self {
        Self {
            target_id: r.target_id,
            corrected: r.corrected(),
            before: r.before.into(),
            after: r.after.into(),
            drift: r.drift.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// Statistics Views
// ============================================================================

/// Query string of `GET /statistics`
#[derive(Debug, Clone, Default, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StatisticsQueryView {
    #[ts(type = "number | null")]
    pub college_id: Option<i64>,
    #[ts(type = "number | null")]
    pub department_id: Option<i64>,
    #[ts(type = "number | null")]
    pub semester_id: Option<i64>,
    #[ts(type = "number | null")]
    pub field_id: Option<i64>,
    #[ts(type = "number | null")]
    pub category_id: Option<i64>,
    /// TOTAL (default), COLLEGE, DEPARTMENT or USER
    pub group_by: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

impl StatisticsQueryView {
    pub fn into_parts(self) -> Result<(StatisticsScope, GroupBy), LedgerError> {
        let group_by = match self.group_by.as_deref() {
            None | Some("") => GroupBy::default(),
            Some(raw) => raw.parse()?,
        };
        let scope = StatisticsScope {
            college_id: self.college_id,
            department_id: self.department_id,
            semester_id: self.semester_id,
            field_id: self.field_id,
            category_id: self.category_id,
            include_inactive: self.include_inactive,
        };
        Ok((scope, group_by))
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct MetricTotalsView {
    #[ts(type = "number")]
    pub project_count: i64,
    #[ts(type = "number")]
    pub like_count: i64,
    #[ts(type = "number")]
    pub founding_recommend_count: i64,
    #[ts(type = "number")]
    pub registration_recommend_count: i64,
}

impl From<MetricTotals> for MetricTotalsView {
    fn from(m: MetricTotals) -> Self {
        Self {
            project_count: m.project_count,
            like_count: m.like_count,
            founding_recommend_count: m.founding_recommend_count,
            registration_recommend_count: m.registration_recommend_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StatisticsRowView {
    /// "total", "college:{id}", "department:{id}", "user:{id}" or "unassigned"
    pub group_key: String,
    pub group_name: Option<String>,
    pub metric_totals: MetricTotalsView,
}

impl From<StatisticsRow> for StatisticsRowView {
    fn from(r: StatisticsRow) -> Self {
        Self {
            group_key: r.group_key.to_string(),
            group_name: r.group_name,
            metric_totals: r.metric_totals.into(),
        }
    }
}

/// Action kind as clients spell it
fn wire_kind(kind: ActionKind) -> String {
    kind.as_str().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_response_is_camel_case() {
        let view = ToggleResponseView::from(Transition {
            user_id: 1,
            target_id: 100,
            action_kind: ActionKind::FoundingRecommend,
            on_state: true,
            changed: true,
            delta: None,
            counters: TargetCounterSet {
                target_id: 100,
                founding_recommend_count: 1,
                ..Default::default()
            },
        });

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["actionKind"], "FOUNDING_RECOMMEND");
        assert_eq!(json["onState"], true);
        assert_eq!(json["counters"]["foundingRecommendCount"], 1);
    }

    #[test]
    fn test_statistics_query_defaults_to_total() {
        let query: StatisticsQueryView =
            serde_urlencoded::from_str("collegeId=2&includeInactive=true").unwrap();
        let (scope, group_by) = query.into_parts().unwrap();
        assert_eq!(group_by, GroupBy::Total);
        assert_eq!(scope.college_id, Some(2));
        assert!(scope.include_inactive);
    }

    #[test]
    fn test_statistics_query_rejects_unknown_group() {
        let query: StatisticsQueryView = serde_urlencoded::from_str("groupBy=SEMESTER").unwrap();
        assert!(query.into_parts().is_err());
    }
}
