//! Run statistics for heartwatch.
//!
//! Tracks how many messages were received, rejected and logged so an
//! operator can audit a run after the fact.

pub mod session;

pub use session::{
    create_shared_stats, create_shared_stats_with_persistence, PersistedStats, SessionStats,
    SharedStats, StatsSnapshot,
};
