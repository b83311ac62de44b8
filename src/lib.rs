//! heartwatch - streaming heart-rate ingestion with a durable append log.
//!
//! Samples arrive from a sensor transport in one of several wire shapes,
//! are normalized into [`Record`]s, written to an append-only text log and
//! summarized once per tick over a trailing time window.
//!
//! # Guarantees
//!
//! - **Durable first**: metrics are always derived from the log, never from
//!   an in-memory copy, so a restarted process recovers its window
//! - **No blocking handoff**: the ingestion thread never waits on the
//!   scheduler; a full channel drops the incoming record
//! - **Bad data is local**: malformed messages and undefined metrics blank
//!   a field, they never stop the pipeline
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            heartwatch                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐            │
//! │  │  Transport  │──▶│ Normalizer  │──▶│  bounded    │            │
//! │  │ (stdin/tcp) │   │ (ingest     │   │  channel    │            │
//! │  └─────────────┘   │  thread)    │   └──────┬──────┘            │
//! │                    └─────────────┘          ▼                   │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐            │
//! │  │  Snapshot   │◀──│   Metrics   │◀──│  Scheduler  │──▶ Log     │
//! │  │   sink      │   │ (window)    │   │   (tick)    │◀── Window  │
//! │  └─────────────┘   └─────────────┘   └─────────────┘            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use heartwatch::core::{Clock, LogStore, SchedulerConfig, SystemClock, UpdateScheduler};
//! use heartwatch::display::{stdout_sink, OutputFormat};
//! use heartwatch::ingest::{IngestActor, Normalizer, TransportSpec};
//! use heartwatch::stats::create_shared_stats;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(SystemClock::default());
//! let stats = create_shared_stats();
//! let transport = TransportSpec::Stdin.open()?;
//! let actor = IngestActor::spawn(transport, Normalizer::new(), clock.clone(), 64, stats.clone())?;
//!
//! let store = LogStore::create("logs".as_ref(), clock.now(), uuid::Uuid::new_v4())?;
//! let scheduler = UpdateScheduler::new(
//!     SchedulerConfig::default(),
//!     store,
//!     actor.receiver().clone(),
//!     stdout_sink(OutputFormat::Console),
//!     clock,
//!     stats,
//! );
//! let (_stop, shutdown) = crossbeam_channel::bounded(1);
//! scheduler.run(shutdown)?;
//! # Ok::<(), heartwatch::HeartError>(())
//! ```

pub mod config;
pub mod core;
pub mod display;
pub mod error;
pub mod ingest;
pub mod stats;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{MetricsSnapshot, UpdateScheduler, WindowMetrics};
pub use display::{OutputFormat, SnapshotSink};
pub use error::{HeartError, Result};
pub use ingest::{IngestActor, Normalizer, Record, WireFormat};
pub use stats::{SessionStats, SharedStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
