//! Metrics snapshots handed to the display collaborator.
//!
//! One snapshot is produced per scheduler tick. Fields that could not be
//! computed are `None` and serialize as `null`; the display renders them as
//! placeholders.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::metrics::{Reading, SeriesPoint, WindowMetrics};
use crate::core::window::WindowEntry;

/// The name of this producer.
pub const PRODUCER_NAME: &str = "heartwatch";

/// Producer metadata stamped on every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    /// Identifies the process run that produced the snapshot
    pub instance_id: Uuid,
}

/// Display-ready view of the current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Wall-clock time of the tick that produced this snapshot
    pub generated_at: NaiveDateTime,
    /// True when no new record arrived since the previous tick, or the
    /// window could not be re-read. Always false outside a running pipeline.
    pub stale: bool,
    pub bpm: Option<Reading>,
    pub ipm: Option<Reading>,
    pub rmssd: Option<Reading>,
    pub hrstd: Option<Reading>,
    pub mean_bpm: Option<f64>,
    pub window_len: usize,
    pub window_series: Vec<SeriesPoint>,
    pub producer: Producer,
}

impl MetricsSnapshot {
    /// The same snapshot re-issued at `at` and flagged stale.
    pub fn restamped_stale(&self, at: NaiveDateTime) -> Self {
        Self {
            generated_at: at,
            stale: true,
            ..self.clone()
        }
    }
}

/// Builds snapshots for one process run.
pub struct SnapshotBuilder {
    instance_id: Uuid,
}

impl SnapshotBuilder {
    /// Create a builder with a fresh instance ID.
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn build(
        &self,
        metrics: WindowMetrics,
        generated_at: NaiveDateTime,
        stale: bool,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            generated_at,
            stale,
            bpm: metrics.bpm,
            ipm: metrics.ipm,
            rmssd: metrics.rmssd,
            hrstd: metrics.hrstd,
            mean_bpm: metrics.mean_bpm,
            window_len: metrics.series.len(),
            window_series: metrics.series,
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: crate::VERSION.to_string(),
                instance_id: self.instance_id,
            },
        }
    }

    /// Snapshot of a window read back from a log after the fact.
    ///
    /// The newest entry stands in for the latest record. There is no tick to
    /// compare against, so the result is never stale.
    pub fn build_offline(
        &self,
        entries: &[WindowEntry],
        as_of: NaiveDateTime,
        ipm_factor: f64,
    ) -> MetricsSnapshot {
        let latest = entries.last().map(|entry| &entry.record);
        let metrics = WindowMetrics::compute(entries, latest, ipm_factor);
        self.build(metrics, as_of, false)
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}
