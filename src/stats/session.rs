//! Counters describing what the pipeline did during a run.
//!
//! The ingestion actor and the scheduler share one [`SessionStats`] through
//! an `Arc`; every counter is a relaxed atomic, so recording never blocks
//! either side. Totals can be persisted and are accumulated across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters for the current run.
#[derive(Debug)]
pub struct SessionStats {
    /// Messages read from the transport
    messages_received: AtomicU64,
    /// Messages that failed to normalize
    records_malformed: AtomicU64,
    /// Records dropped because the handoff channel was full
    records_dropped: AtomicU64,
    /// Transport read failures
    transport_errors: AtomicU64,
    /// Records written to the log
    records_appended: AtomicU64,
    /// Records refused by the log for lack of a valid rate
    records_rejected: AtomicU64,
    /// Scheduler ticks completed
    ticks: AtomicU64,
    /// Ticks without a new record
    stale_ticks: AtomicU64,
    /// Log write or read failures
    log_errors: AtomicU64,
    /// Display publish failures
    sink_errors: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting totals
    persist_path: Option<PathBuf>,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            records_malformed: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            records_appended: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            stale_ticks: AtomicU64::new(0),
            log_errors: AtomicU64::new(0),
            sink_errors: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that continue from totals persisted at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("could not load previous session stats: {e}");
        }

        stats
    }

    counter!(record_message, messages_received);
    counter!(record_malformed, records_malformed);
    counter!(record_dropped, records_dropped);
    counter!(record_transport_error, transport_errors);
    counter!(record_appended, records_appended);
    counter!(record_rejected, records_rejected);
    counter!(record_tick, ticks);
    counter!(record_stale_tick, stale_ticks);
    counter!(record_log_error, log_errors);
    counter!(record_sink_error, sink_errors);

    /// Get the current totals.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            records_malformed: self.records_malformed.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            stale_ticks: self.stale_ticks.load(Ordering::Relaxed),
            log_errors: self.log_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Messages received: {}\n\
             - Malformed messages: {}\n\
             - Dropped (channel full): {}\n\
             - Transport errors: {}\n\
             - Records appended: {}\n\
             - Records rejected (no signal): {}\n\
             - Ticks: {} ({} stale)\n\
             - Log errors: {}\n\
             - Display errors: {}\n\
             - Session duration: {} seconds",
            s.messages_received,
            s.records_malformed,
            s.records_dropped,
            s.transport_errors,
            s.records_appended,
            s.records_rejected,
            s.ticks,
            s.stale_ticks,
            s.log_errors,
            s.sink_errors,
            s.session_duration_secs
        )
    }

    /// Save totals to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let s = self.snapshot();
            let persisted = PersistedStats {
                messages_received: s.messages_received,
                records_malformed: s.records_malformed,
                records_appended: s.records_appended,
                records_rejected: s.records_rejected,
                ticks: s.ticks,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.messages_received
                    .store(persisted.messages_received, Ordering::Relaxed);
                self.records_malformed
                    .store(persisted.records_malformed, Ordering::Relaxed);
                self.records_appended
                    .store(persisted.records_appended, Ordering::Relaxed);
                self.records_rejected
                    .store(persisted.records_rejected, Ordering::Relaxed);
                self.ticks.store(persisted.ticks, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub records_malformed: u64,
    pub records_dropped: u64,
    pub transport_errors: u64,
    pub records_appended: u64,
    pub records_rejected: u64,
    pub ticks: u64,
    pub stale_ticks: u64,
    pub log_errors: u64,
    pub sink_errors: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Cumulative totals kept between runs.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub messages_received: u64,
    pub records_malformed: u64,
    pub records_appended: u64,
    pub records_rejected: u64,
    pub ticks: u64,
    pub last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedStats = Arc<SessionStats>;

/// Create new shared stats.
pub fn create_shared_stats() -> SharedStats {
    Arc::new(SessionStats::new())
}

/// Create shared stats that persist to `path`.
pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(SessionStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = SessionStats::new();

        stats.record_message();
        stats.record_message();
        stats.record_malformed();
        stats.record_tick();
        stats.record_stale_tick();

        let s = stats.snapshot();
        assert_eq!(s.messages_received, 2);
        assert_eq!(s.records_malformed, 1);
        assert_eq!(s.ticks, 1);
        assert_eq!(s.stale_ticks, 1);
        assert_eq!(s.records_appended, 0);
    }

    #[test]
    fn test_summary_format() {
        let summary = SessionStats::new().summary();

        assert!(summary.contains("Messages received"));
        assert!(summary.contains("Records appended"));
        assert!(summary.contains("Ticks"));
    }

    #[test]
    fn test_persistence_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("stats.json");

        let first = SessionStats::with_persistence(path.clone());
        first.record_appended();
        first.record_appended();
        first.save().unwrap();

        let second = SessionStats::with_persistence(path);
        second.record_appended();
        assert_eq!(second.snapshot().records_appended, 3);
    }
}
