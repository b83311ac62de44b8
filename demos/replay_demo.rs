//! Replay of a short recorded session through the full pipeline.
//!
//! This example shows how to:
//! 1. Implement a custom transport
//! 2. Spawn the ingestion actor over it
//! 3. Drive the update scheduler until the input ends
//! 4. Read the run's log back afterwards
//!
//! Run with: cargo run --example replay_demo

use std::sync::Arc;
use std::time::Duration;

use heartwatch::{
    core::{
        Clock, LogStore, SchedulerConfig, SnapshotBuilder, SystemClock, UpdateScheduler,
        WindowMode, WindowReader,
    },
    display::{stdout_sink, OutputFormat},
    ingest::{IngestActor, Normalizer, Transport},
    stats::create_shared_stats,
};

/// Every shape the normalizer understands, including a no-signal reading and
/// one message that cannot be decoded.
const SESSION: &[&str] = &[
    "72",
    "{\"bpm\": 74, \"ipm\": 16, \"raw_data\": [512, 519, 527]}",
    "BPM=80, Avg BPM=75",
    "{'bpm': 73, 'rmssd': 41.5}",
    "-1",
    "not a sample",
    "71.5",
    "hr=70; ipm=15",
];

/// Yields canned messages with a fixed delay, like a sensor would.
struct PacedTransport {
    messages: std::vec::IntoIter<Vec<u8>>,
    delay: Duration,
}

impl PacedTransport {
    fn new(messages: &[&str], delay: Duration) -> Self {
        Self {
            messages: messages
                .iter()
                .map(|m| m.as_bytes().to_vec())
                .collect::<Vec<_>>()
                .into_iter(),
            delay,
        }
    }
}

impl Transport for PacedTransport {
    fn recv(&mut self) -> heartwatch::Result<Option<Vec<u8>>> {
        std::thread::sleep(self.delay);
        Ok(self.messages.next())
    }
}

fn main() -> anyhow::Result<()> {
    println!("heartwatch - Replay Demo");
    println!("========================");
    println!();

    let dir = tempfile::tempdir()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
    let stats = create_shared_stats();
    let builder = SnapshotBuilder::new();

    let store = LogStore::create(dir.path(), clock.now(), builder.instance_id())?;
    let log_path = store.path().to_path_buf();
    println!("Log: {}", log_path.display());
    println!();

    let actor = IngestActor::spawn(
        Box::new(PacedTransport::new(SESSION, Duration::from_millis(300))),
        Normalizer::new(),
        clock.clone(),
        8,
        stats.clone(),
    )?;

    let config = SchedulerConfig {
        tick_interval: Duration::from_millis(500),
        window_duration: Duration::from_secs(30),
        window_mode: WindowMode::Tail,
        ..SchedulerConfig::default()
    };
    let scheduler = UpdateScheduler::new(
        config,
        store,
        actor.receiver().clone(),
        stdout_sink(OutputFormat::Console),
        clock.clone(),
        stats.clone(),
    )
    .with_builder(builder);

    let (_stop, shutdown) = crossbeam_channel::bounded::<()>(1);
    scheduler.run(shutdown)?;
    actor.join();

    println!();
    let entries = WindowReader::new(&log_path).read_window(Duration::from_secs(30), clock.now())?;
    println!("{} records in the final window:", entries.len());
    for entry in &entries {
        println!("  {} {}", entry.timestamp, entry.record.body()?);
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}
