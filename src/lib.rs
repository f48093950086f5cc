//! Engagement Ledger - toggle ledger, counters and statistics for projects
//!
//! Users like a project, recommend it for founding, or recommend it for
//! registration. Each of these is an on/off toggle recorded once per
//! (user, target, action kind). Every state change projects a signed delta
//! onto per-target counters in the same transaction, and the statistics
//! rollup aggregates those counters over the organizational hierarchy.
//!
//! ## Architecture
//!
//! ```text
//! HTTP (hyper)
//!     ↓
//! EngagementService ── retry loop, events
//! StatisticsService ── scope validation, grouping
//!     ↓
//! db::ledger ─→ db::counters ─→ counter_deltas
//! db::statistics, db::hierarchy
//!     ↓
//! SQLite (WAL)
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/engagement-ledger/
//! ├── engagement.db          # Ledger, counters, delta log, reference data
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod error;
pub mod db;
pub mod services;
pub mod views;
pub mod seed;
pub mod http;

// Re-exports
pub use config::Config;
pub use error::LedgerError;
pub use db::{ActionKind, EngagementDb, GroupBy, GroupKey, LifecycleState, StatisticsScope};
pub use services::{EngagementService, EventBus, Services, StatisticsService};
pub use seed::SeedData;
pub use http::HttpServer;
