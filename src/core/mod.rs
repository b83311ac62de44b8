//! Core pipeline for heartwatch.
//!
//! This module contains:
//! - The append-only log store and the window readers over it
//! - Metric computation over the trailing window
//! - Snapshot building for the display boundary
//! - The scheduler that ties them together once per tick

pub mod clock;
pub mod metrics;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod window;

// Re-export commonly used types
pub use clock::{Clock, FixedClock, SystemClock, Zone};
pub use metrics::{
    approximate_ipm, hrstd, rmssd, Origin, Reading, SeriesPoint, WindowMetrics,
    DEFAULT_IPM_FACTOR,
};
pub use scheduler::{SchedulerConfig, SchedulerState, TickSummary, UpdateScheduler};
pub use snapshot::{MetricsSnapshot, Producer, SnapshotBuilder, PRODUCER_NAME};
pub use store::{latest_log, AppendOutcome, LogStore, FIELD_SEPARATOR, TIMESTAMP_FORMAT};
pub use window::{TailingWindow, WindowEntry, WindowMode, WindowReader, MAX_WINDOW_SECS};
