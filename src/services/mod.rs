//! Service layer for the engagement ledger
//!
//! Services sit between the HTTP handlers and the repository functions in
//! `db/`. They validate against the hierarchy, own retry and transaction
//! boundaries, and emit events after commit.
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (validation, retries, events)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod hierarchy_index;
pub mod engagement_service;
pub mod statistics_service;

// Re-exports
pub use response::*;
pub use events::{EventBus, EventListener, LedgerEvent};
pub use hierarchy_index::{HierarchyIndex, SqliteHierarchyIndex};
pub use engagement_service::{EngagementService, RetryPolicy, ViewerState};
pub use statistics_service::{StatisticsRow, StatisticsService};

use std::sync::Arc;

use crate::config::Config;
use crate::db::EngagementDb;

/// Service container for dependency injection
///
/// Holds all services over one shared database. Pass this to HttpServer for
/// handler access.
pub struct Services {
    pub db: Arc<EngagementDb>,
    pub engagement: Arc<EngagementService>,
    pub statistics: Arc<StatisticsService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with the SQLite hierarchy index
    pub fn new(db: Arc<EngagementDb>, config: &Config) -> Self {
        let index: Arc<dyn HierarchyIndex> = Arc::new(SqliteHierarchyIndex::new(db.clone()));
        Self::with_index(db, index, RetryPolicy::from(config))
    }

    /// Create all services over a caller-supplied hierarchy index
    pub fn with_index(
        db: Arc<EngagementDb>,
        index: Arc<dyn HierarchyIndex>,
        retry: RetryPolicy,
    ) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            engagement: Arc::new(EngagementService::new(
                db.clone(),
                index.clone(),
                events.clone(),
                retry,
            )),
            statistics: Arc::new(StatisticsService::new(db.clone(), index)),
            events,
            db,
        }
    }
}
