//! End-to-end tests: ingestion actor → scheduler → log → snapshot sink

use chrono::{NaiveDate, NaiveDateTime};
use crossbeam_channel::{unbounded, Receiver};
use heartwatch::core::{
    Clock, FixedClock, LogStore, MetricsSnapshot, Origin, SchedulerConfig, UpdateScheduler,
    WindowMode,
};
use heartwatch::display::ChannelSink;
use heartwatch::ingest::{IngestActor, LineTransport, Normalizer, Transport};
use heartwatch::HeartError;
use heartwatch::stats::{create_shared_stats, SharedStats};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 20)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

struct Pipeline {
    actor: IngestActor,
    scheduler: UpdateScheduler,
    snapshots: Receiver<MetricsSnapshot>,
    stats: SharedStats,
    log_path: PathBuf,
    _dir: tempfile::TempDir,
}

fn pipeline(input: &str, config: SchedulerConfig) -> Pipeline {
    let transport = LineTransport::new(Cursor::new(input.as_bytes().to_vec()));
    pipeline_over(Box::new(transport), config)
}

fn pipeline_over(transport: Box<dyn Transport>, config: SchedulerConfig) -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(start()));
    let stats = create_shared_stats();

    let actor = IngestActor::spawn(
        transport,
        Normalizer::new(),
        clock.clone(),
        16,
        stats.clone(),
    )
    .unwrap();

    let store = LogStore::create(dir.path(), start(), Uuid::new_v4()).unwrap();
    let log_path = store.path().to_path_buf();
    let (tx, snapshots) = unbounded();
    let scheduler = UpdateScheduler::new(
        config,
        store,
        actor.receiver().clone(),
        Box::new(ChannelSink::new(tx)),
        clock,
        stats.clone(),
    );

    Pipeline {
        actor,
        scheduler,
        snapshots,
        stats,
        log_path,
        _dir: dir,
    }
}

/// Delivers one sample, then loses the connection.
struct DroppedConnection {
    delivered: bool,
}

impl Transport for DroppedConnection {
    fn recv(&mut self) -> heartwatch::Result<Option<Vec<u8>>> {
        if self.delivered {
            Err(HeartError::Transport("connection reset".to_string()))
        } else {
            self.delivered = true;
            Ok(Some(b"70".to_vec()))
        }
    }
}

fn wait_for_input(actor: &IngestActor) {
    while actor.is_running() {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_mixed_wire_formats_flow_into_one_snapshot() {
    let input = "70\ngarbage\n{\"bpm\": 72, \"ipm\": 15}\nBPM=90, Avg BPM=68\n-1\n";
    let mut p = pipeline(input, SchedulerConfig::default());
    wait_for_input(&p.actor);

    let summary = p.scheduler.tick();
    assert_eq!(summary.received, 4);
    assert_eq!(summary.appended, 3);
    assert!(summary.input_closed);

    let snapshot = p.snapshots.try_recv().unwrap();
    assert_eq!(snapshot.window_len, 3);
    let bpms: Vec<f64> = snapshot.window_series.iter().map(|point| point.bpm).collect();
    assert_eq!(bpms, vec![70.0, 72.0, 68.0]);

    let rmssd = snapshot.rmssd.unwrap();
    assert_eq!(rmssd.origin, Origin::Computed);
    assert!((rmssd.value - 3.1623).abs() < 1e-4);
    let hrstd = snapshot.hrstd.unwrap();
    assert!((hrstd.value - 1.633).abs() < 1e-3);

    // The newest record has no signal, so the displayed rate is blank.
    assert_eq!(snapshot.bpm, None);
    assert_eq!(snapshot.ipm, None);
    assert_eq!(snapshot.window_series[1].ipm, Some(15.0));

    let stats = p.stats.snapshot();
    assert_eq!(stats.messages_received, 5);
    assert_eq!(stats.records_malformed, 1);
    assert_eq!(stats.records_appended, 3);
    assert_eq!(stats.records_rejected, 1);
}

#[test]
fn test_run_stops_when_input_ends() {
    let config = SchedulerConfig {
        tick_interval: Duration::from_millis(10),
        window_mode: WindowMode::Tail,
        ..SchedulerConfig::default()
    };
    let p = pipeline("61\n62\n63\n", config);
    let (_stop, shutdown) = crossbeam_channel::bounded::<()>(1);

    p.scheduler.run(shutdown).unwrap();
    p.actor.join();

    let content = std::fs::read_to_string(&p.log_path).unwrap();
    let logged: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(logged.len(), 3);
    assert!(logged[0].ends_with(" - {\"bpm\":61.0}"));

    let last = p.snapshots.try_iter().last().unwrap();
    assert_eq!(last.window_len, 3);
    assert_eq!(last.bpm.map(|r| r.value), Some(63.0));
    assert_eq!(last.ipm.map(|r| r.origin), Some(Origin::Approximated));
}

#[test]
fn test_transport_failure_keeps_scheduler_ticking() {
    let config = SchedulerConfig {
        tick_interval: Duration::from_millis(10),
        ..SchedulerConfig::default()
    };
    let p = pipeline_over(Box::new(DroppedConnection { delivered: false }), config);
    let (stop, shutdown) = crossbeam_channel::bounded::<()>(1);

    let scheduler = p.scheduler;
    let handle = std::thread::spawn(move || scheduler.run(shutdown));
    std::thread::sleep(Duration::from_millis(200));

    assert!(!handle.is_finished());
    assert!(p.actor.failed());

    stop.send(()).unwrap();
    handle.join().unwrap().unwrap();

    let stats = p.stats.snapshot();
    assert_eq!(stats.transport_errors, 1);
    assert_eq!(stats.records_appended, 1);
    assert!(stats.ticks > 1);
    assert!(stats.stale_ticks >= 1);

    let last = p.snapshots.try_iter().last().unwrap();
    assert!(last.stale);
    assert_eq!(last.bpm.map(|r| r.value), Some(70.0));
    p.actor.join();
}
