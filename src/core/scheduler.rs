//! Periodic driver of the pipeline.
//!
//! Each tick drains the handoff channel, appends new records to the log,
//! re-derives the trailing window from the log, recomputes metrics and
//! publishes a snapshot. Bad data never stops the loop: every failure is
//! logged, counted and turned into a missing or stale field.

use chrono::NaiveDateTime;
use crossbeam_channel::{select, tick, Receiver, TryRecvError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::clock::Clock;
use crate::core::metrics::{WindowMetrics, DEFAULT_IPM_FACTOR};
use crate::core::snapshot::{MetricsSnapshot, SnapshotBuilder};
use crate::core::store::{AppendOutcome, LogStore};
use crate::core::window::{TailingWindow, WindowEntry, WindowMode, WindowReader};
use crate::display::SnapshotSink;
use crate::error::Result;
use crate::ingest::Record;
use crate::stats::SharedStats;

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period between ticks
    pub tick_interval: Duration,
    /// Trailing window length
    pub window_duration: Duration,
    /// Multiplier for the IPM approximation
    pub ipm_factor: f64,
    pub window_mode: WindowMode,
    /// Stop after the tick that observes the ingestion side hanging up
    pub stop_when_input_closes: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            window_duration: Duration::from_secs(60),
            ipm_factor: DEFAULT_IPM_FACTOR,
            window_mode: WindowMode::Scan,
            stop_when_input_closes: true,
        }
    }
}

/// The two scheduler states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick
    Idle,
    /// A tick is in progress
    Processing,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSummary {
    /// Records taken off the channel
    pub received: usize,
    /// Records written to the log
    pub appended: usize,
    /// No new record arrived this tick
    pub stale: bool,
    /// The ingestion side has hung up and the channel is empty
    pub input_closed: bool,
}

enum WindowSource {
    Scan(WindowReader),
    Tail(TailingWindow),
}

impl WindowSource {
    fn new(mode: WindowMode, path: &Path, duration: Duration) -> Self {
        match mode {
            WindowMode::Scan => WindowSource::Scan(WindowReader::new(path)),
            WindowMode::Tail => WindowSource::Tail(TailingWindow::new(path, duration)),
        }
    }

    fn read(&mut self, duration: Duration, as_of: NaiveDateTime) -> Result<Vec<WindowEntry>> {
        match self {
            WindowSource::Scan(reader) => reader.read_window(duration, as_of),
            WindowSource::Tail(tail) => tail.refresh(as_of),
        }
    }
}

/// Owns the log store and drives one tick per timer period.
pub struct UpdateScheduler {
    config: SchedulerConfig,
    store: LogStore,
    window: WindowSource,
    receiver: Receiver<Record>,
    sink: Box<dyn SnapshotSink>,
    clock: Arc<dyn Clock>,
    builder: SnapshotBuilder,
    stats: SharedStats,
    state: SchedulerState,
    latest: Option<Record>,
    last_snapshot: Option<MetricsSnapshot>,
}

impl UpdateScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: LogStore,
        receiver: Receiver<Record>,
        sink: Box<dyn SnapshotSink>,
        clock: Arc<dyn Clock>,
        stats: SharedStats,
    ) -> Self {
        let window = WindowSource::new(config.window_mode, store.path(), config.window_duration);
        Self {
            config,
            store,
            window,
            receiver,
            sink,
            clock,
            builder: SnapshotBuilder::new(),
            stats,
            state: SchedulerState::Idle,
            latest: None,
            last_snapshot: None,
        }
    }

    /// Use a specific snapshot builder (e.g. to share the run's instance ID).
    pub fn with_builder(mut self, builder: SnapshotBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The most recently published snapshot.
    pub fn last_snapshot(&self) -> Option<&MetricsSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn log_path(&self) -> &Path {
        self.store.path()
    }

    /// Run one tick.
    pub fn tick(&mut self) -> TickSummary {
        self.state = SchedulerState::Processing;
        let mut summary = TickSummary::default();

        let (pending, input_closed) = self.drain();
        summary.received = pending.len();
        summary.input_closed = input_closed;
        summary.stale = pending.is_empty();

        for record in pending {
            match self.store.append(&record, record.timestamp) {
                Ok(AppendOutcome::Appended) => {
                    self.stats.record_appended();
                    summary.appended += 1;
                }
                Ok(AppendOutcome::Rejected) => {
                    self.stats.record_rejected();
                    tracing::debug!(bpm = record.bpm, "no signal, record not logged");
                }
                Err(e) => {
                    self.stats.record_log_error();
                    tracing::warn!(error = %e, "failed to append record");
                }
            }
            self.latest = Some(record);
        }

        let now = self.clock.now();
        let snapshot = match self.window.read(self.config.window_duration, now) {
            Ok(entries) => {
                let metrics =
                    WindowMetrics::compute(&entries, self.latest.as_ref(), self.config.ipm_factor);
                self.builder.build(metrics, now, summary.stale)
            }
            Err(e) => {
                self.stats.record_log_error();
                tracing::warn!(error = %e, "failed to read window, publishing stale data");
                match &self.last_snapshot {
                    Some(previous) => previous.restamped_stale(now),
                    None => self.builder.build(
                        WindowMetrics::compute(&[], self.latest.as_ref(), self.config.ipm_factor),
                        now,
                        true,
                    ),
                }
            }
        };

        if let Err(e) = self.sink.publish(&snapshot) {
            self.stats.record_sink_error();
            tracing::warn!(error = %e, "failed to publish snapshot");
        }
        self.last_snapshot = Some(snapshot);

        self.stats.record_tick();
        if summary.stale {
            self.stats.record_stale_tick();
        }
        self.state = SchedulerState::Idle;
        summary
    }

    /// Take everything currently queued, without blocking.
    ///
    /// At most one channel's worth of records is taken so a fast producer
    /// cannot keep a tick from finishing.
    fn drain(&mut self) -> (Vec<Record>, bool) {
        let limit = self.receiver.capacity().unwrap_or(usize::MAX).max(1);
        let mut pending = Vec::new();

        while pending.len() < limit {
            match self.receiver.try_recv() {
                Ok(record) => pending.push(record),
                Err(TryRecvError::Empty) => return (pending, false),
                Err(TryRecvError::Disconnected) => return (pending, true),
            }
        }
        (pending, false)
    }

    /// Tick until `shutdown` fires (or its sender is dropped), then close
    /// the log.
    ///
    /// With `stop_when_input_closes`, the loop also ends after the tick that
    /// finds the ingestion side gone and the channel empty.
    pub fn run(mut self, shutdown: Receiver<()>) -> Result<()> {
        let ticker = tick(self.config.tick_interval);
        tracing::info!(
            log = %self.store.path().display(),
            interval_ms = self.config.tick_interval.as_millis() as u64,
            "scheduler started"
        );

        loop {
            select! {
                recv(ticker) -> _ => {
                    let summary = self.tick();
                    if summary.input_closed && self.config.stop_when_input_closes {
                        tracing::info!("input closed, stopping scheduler");
                        break;
                    }
                }
                recv(shutdown) -> _ => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }

        self.close()
    }

    /// Flush and close the log store.
    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::core::metrics::Origin;
    use crate::display::ChannelSink;
    use crate::stats::create_shared_stats;
    use chrono::NaiveDate;
    use crossbeam_channel::{bounded, unbounded, Sender};
    use uuid::Uuid;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    struct Harness {
        scheduler: UpdateScheduler,
        input: Sender<Record>,
        output: Receiver<MetricsSnapshot>,
        clock: Arc<FixedClock>,
        stats: SharedStats,
        _dir: tempfile::TempDir,
    }

    fn harness(mode: WindowMode) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::create(dir.path(), start(), Uuid::new_v4()).unwrap();
        let (input, receiver) = bounded(16);
        let (snapshots, output) = unbounded();
        let clock = Arc::new(FixedClock::new(start()));
        let stats = create_shared_stats();

        let config = SchedulerConfig {
            window_mode: mode,
            ..SchedulerConfig::default()
        };
        let scheduler = UpdateScheduler::new(
            config,
            store,
            receiver,
            Box::new(ChannelSink::new(snapshots)),
            clock.clone(),
            stats.clone(),
        );

        Harness {
            scheduler,
            input,
            output,
            clock,
            stats,
            _dir: dir,
        }
    }

    fn send(h: &Harness, bpm: f64) {
        h.input.send(Record::from_bpm(h.clock.now(), bpm)).unwrap();
    }

    #[test]
    fn test_tick_appends_and_publishes() {
        let mut h = harness(WindowMode::Scan);

        for bpm in [70.0, 72.0, 68.0] {
            send(&h, bpm);
            h.clock.advance(chrono::Duration::seconds(1));
        }
        let summary = h.scheduler.tick();

        assert_eq!(summary.received, 3);
        assert_eq!(summary.appended, 3);
        assert!(!summary.stale);
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);

        let snapshot = h.output.try_recv().unwrap();
        assert_eq!(snapshot.window_len, 3);
        assert_eq!(snapshot.bpm.map(|r| r.value), Some(68.0));
        let rmssd = snapshot.rmssd.unwrap();
        assert_eq!(rmssd.origin, Origin::Computed);
        assert!((rmssd.value - 10f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_empty_tick_is_stale_and_reuses_latest() {
        let mut h = harness(WindowMode::Scan);
        send(&h, 75.0);
        h.scheduler.tick();

        h.clock.advance(chrono::Duration::seconds(1));
        let summary = h.scheduler.tick();

        assert!(summary.stale);
        assert_eq!(summary.received, 0);
        let snapshots: Vec<MetricsSnapshot> = h.output.try_iter().collect();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[1].stale);
        assert_eq!(snapshots[1].bpm.map(|r| r.value), Some(75.0));
        assert_eq!(h.stats.snapshot().stale_ticks, 1);
    }

    #[test]
    fn test_no_signal_record_is_not_logged() {
        let mut h = harness(WindowMode::Scan);
        send(&h, -1.0);
        let summary = h.scheduler.tick();

        assert_eq!(summary.appended, 0);
        let snapshot = h.output.try_recv().unwrap();
        assert_eq!(snapshot.bpm, None);
        assert_eq!(snapshot.window_len, 0);
        assert_eq!(h.stats.snapshot().records_rejected, 1);
    }

    #[test]
    fn test_window_expires_old_records() {
        let mut h = harness(WindowMode::Tail);
        send(&h, 60.0);
        h.scheduler.tick();

        h.clock.advance(chrono::Duration::seconds(61));
        send(&h, 80.0);
        h.scheduler.tick();

        let last = h.output.try_iter().last().unwrap();
        assert_eq!(last.window_len, 1);
        assert_eq!(last.window_series[0].bpm, 80.0);
        assert_eq!(last.rmssd, None);
    }

    #[test]
    fn test_reports_input_closed() {
        let mut h = harness(WindowMode::Scan);
        send(&h, 70.0);
        let Harness {
            mut scheduler,
            input,
            ..
        } = h;
        drop(input);

        let summary = scheduler.tick();
        assert_eq!(summary.appended, 1);
        assert!(summary.input_closed);
    }

    #[test]
    fn test_run_stops_on_shutdown_and_closes_log() {
        let h = harness(WindowMode::Scan);
        send(&h, 70.0);
        let path = h.scheduler.log_path().to_path_buf();

        let (stop, shutdown) = bounded(1);
        let config_interval = Duration::from_millis(10);
        let mut scheduler = h.scheduler;
        scheduler.config.tick_interval = config_interval;
        let handle = std::thread::spawn(move || scheduler.run(shutdown));

        std::thread::sleep(Duration::from_millis(100));
        stop.send(()).unwrap();
        handle.join().unwrap().unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("{\"bpm\":70.0}"));
        assert!(h.output.try_iter().count() >= 1);
        drop(h.input);
    }
}
