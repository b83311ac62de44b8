//! The ingestion actor: a thread that blocks on the transport.
//!
//! Each message is normalized and handed to the scheduler through a
//! bounded crossbeam channel. The actor never waits on the scheduler: when
//! the channel is full the incoming record is dropped and counted.
//!
//! The channel disconnects only at end of stream. A transport failure parks
//! the sender in the actor handle, so the scheduler keeps ticking on stale
//! data instead of treating the failure as end of input.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::core::clock::Clock;
use crate::error::{HeartError, Result};
use crate::ingest::normalizer::Normalizer;
use crate::ingest::types::Record;
use crate::stats::SharedStats;

/// Default capacity of the ingestion → scheduler handoff.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A source of raw messages.
pub trait Transport: Send {
    /// Block until the next message arrives; `Ok(None)` once the stream ends.
    fn recv(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Newline-delimited messages over any buffered reader.
pub struct LineTransport<R> {
    reader: R,
}

impl<R: BufRead + Send> LineTransport<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead + Send> Transport for LineTransport<R> {
    fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let mut line = Vec::new();
            let n = self
                .reader
                .read_until(b'\n', &mut line)
                .map_err(|e| HeartError::Transport(e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }
}

/// Where the `run` command reads messages from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    Stdin,
    File(PathBuf),
    Tcp(String),
}

impl TransportSpec {
    /// Open the transport. Only the initial connect is attempted; there is
    /// no reconnection.
    pub fn open(&self) -> Result<Box<dyn Transport>> {
        match self {
            TransportSpec::Stdin => Ok(Box::new(LineTransport::new(BufReader::new(
                std::io::stdin(),
            )))),
            TransportSpec::File(path) => {
                let file = File::open(path).map_err(|e| {
                    HeartError::Transport(format!("cannot open {}: {e}", path.display()))
                })?;
                Ok(Box::new(LineTransport::new(BufReader::new(file))))
            }
            TransportSpec::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .map_err(|e| HeartError::Transport(format!("cannot connect to {addr}: {e}")))?;
                Ok(Box::new(LineTransport::new(BufReader::new(stream))))
            }
        }
    }
}

impl FromStr for TransportSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "stdin" || s == "-" {
            Ok(TransportSpec::Stdin)
        } else if let Some(path) = s.strip_prefix("file:") {
            Ok(TransportSpec::File(PathBuf::from(path)))
        } else if let Some(addr) = s.strip_prefix("tcp:") {
            Ok(TransportSpec::Tcp(addr.to_string()))
        } else {
            Err(format!(
                "unknown source '{s}' (expected stdin, file:<path> or tcp:<host:port>)"
            ))
        }
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSpec::Stdin => f.write_str("stdin"),
            TransportSpec::File(path) => write!(f, "file:{}", path.display()),
            TransportSpec::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// How the ingestion loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngestEnd {
    /// The transport reported end of stream
    EndOfStream,
    /// Reading the transport failed
    TransportFailed,
    /// The receiving side was dropped
    ReceiverGone,
}

/// Handle to a running ingestion thread.
pub struct IngestActor {
    receiver: Receiver<Record>,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    /// Sender kept alive after a transport failure
    parked: Arc<Mutex<Option<Sender<Record>>>>,
    handle: Option<JoinHandle<()>>,
}

impl IngestActor {
    /// Start reading from `transport` on a dedicated thread.
    pub fn spawn(
        transport: Box<dyn Transport>,
        normalizer: Normalizer,
        clock: Arc<dyn Clock>,
        capacity: usize,
        stats: SharedStats,
    ) -> Result<Self> {
        let (sender, receiver) = bounded(capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));

        let failed = Arc::new(AtomicBool::new(false));
        let parked = Arc::new(Mutex::new(None));

        let (running_flag, failed_flag, slot) = (running.clone(), failed.clone(), parked.clone());
        let handle = thread::Builder::new()
            .name("heartwatch-ingest".to_string())
            .spawn(move || {
                let end = ingest_loop(transport, normalizer, clock.as_ref(), &sender, &stats);
                if end == IngestEnd::TransportFailed {
                    failed_flag.store(true, Ordering::SeqCst);
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some(sender);
                    }
                }
                running_flag.store(false, Ordering::SeqCst);
            })
            .map_err(|e| HeartError::Transport(format!("cannot spawn ingest thread: {e}")))?;

        Ok(Self {
            receiver,
            running,
            failed,
            parked,
            handle: Some(handle),
        })
    }

    /// Get the receiving end of the handoff channel.
    pub fn receiver(&self) -> &Receiver<Record> {
        &self.receiver
    }

    /// Check whether the transport is still being read.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Check whether ingestion stopped because the transport failed.
    ///
    /// After a failure the channel stays connected for as long as this
    /// handle lives; dropping or joining the handle releases it.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Wait for the thread to finish once the transport has ended.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("ingest thread panicked");
            }
        }
        if let Ok(mut slot) = self.parked.lock() {
            slot.take();
        }
    }
}

fn ingest_loop(
    mut transport: Box<dyn Transport>,
    normalizer: Normalizer,
    clock: &dyn Clock,
    sender: &Sender<Record>,
    stats: &SharedStats,
) -> IngestEnd {
    loop {
        let message = match transport.recv() {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!("transport ended");
                return IngestEnd::EndOfStream;
            }
            Err(e) => {
                stats.record_transport_error();
                tracing::warn!(error = %e, "transport failed, no further records will arrive");
                return IngestEnd::TransportFailed;
            }
        };
        stats.record_message();

        let record = match normalizer.normalize(&message, clock.now()) {
            Ok(record) => record,
            Err(e) => {
                stats.record_malformed();
                tracing::warn!(error = %e, "dropping malformed message");
                continue;
            }
        };

        match sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                stats.record_dropped();
                tracing::warn!("handoff channel full, dropping record");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("scheduler gone, stopping ingestion");
                return IngestEnd::ReceiverGone;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::stats::create_shared_stats;
    use chrono::NaiveDate;
    use crossbeam_channel::RecvTimeoutError;
    use std::io::Cursor;
    use std::time::Duration;

    /// Yields its messages, then fails.
    struct BrokenTransport {
        messages: Vec<&'static str>,
    }

    impl Transport for BrokenTransport {
        fn recv(&mut self) -> Result<Option<Vec<u8>>> {
            if self.messages.is_empty() {
                Err(HeartError::Transport("connection reset".to_string()))
            } else {
                Ok(Some(self.messages.remove(0).as_bytes().to_vec()))
            }
        }
    }

    fn wait_until_stopped(actor: &IngestActor) {
        while actor.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        ))
    }

    #[test]
    fn test_line_transport_splits_messages() {
        let mut transport = LineTransport::new(Cursor::new(b"70\r\n\n{\"bpm\": 71}\n72".to_vec()));

        assert_eq!(transport.recv().unwrap(), Some(b"70".to_vec()));
        assert_eq!(transport.recv().unwrap(), Some(b"{\"bpm\": 71}".to_vec()));
        assert_eq!(transport.recv().unwrap(), Some(b"72".to_vec()));
        assert_eq!(transport.recv().unwrap(), None);
    }

    #[test]
    fn test_transport_spec_parsing() {
        assert_eq!("stdin".parse::<TransportSpec>(), Ok(TransportSpec::Stdin));
        assert_eq!(
            "file:/tmp/samples.txt".parse::<TransportSpec>(),
            Ok(TransportSpec::File(PathBuf::from("/tmp/samples.txt")))
        );
        assert_eq!(
            "tcp:127.0.0.1:9000".parse::<TransportSpec>(),
            Ok(TransportSpec::Tcp("127.0.0.1:9000".to_string()))
        );
        assert!("bluetooth".parse::<TransportSpec>().is_err());
    }

    #[test]
    fn test_actor_forwards_records_and_skips_malformed() {
        let stats = create_shared_stats();
        let input = Cursor::new(b"70\ngarbage\nBPM=75, Avg BPM=72\n".to_vec());
        let actor = IngestActor::spawn(
            Box::new(LineTransport::new(input)),
            Normalizer::new(),
            clock(),
            8,
            stats.clone(),
        )
        .unwrap();

        let bpms: Vec<f64> = actor.receiver().iter().map(|r| r.bpm).collect();
        assert_eq!(bpms, vec![70.0, 72.0]);

        actor.join();
        let s = stats.snapshot();
        assert_eq!(s.messages_received, 3);
        assert_eq!(s.records_malformed, 1);
    }

    #[test]
    fn test_actor_drops_when_channel_full() {
        let stats = create_shared_stats();
        let input = Cursor::new(b"70\n71\n72\n".to_vec());
        let actor = IngestActor::spawn(
            Box::new(LineTransport::new(input)),
            Normalizer::new(),
            clock(),
            1,
            stats.clone(),
        )
        .unwrap();

        wait_until_stopped(&actor);

        let bpms: Vec<f64> = actor.receiver().try_iter().map(|r| r.bpm).collect();
        assert_eq!(bpms, vec![70.0]);
        assert_eq!(stats.snapshot().records_dropped, 2);
        actor.join();
    }

    #[test]
    fn test_transport_failure_keeps_channel_open() {
        let stats = create_shared_stats();
        let actor = IngestActor::spawn(
            Box::new(BrokenTransport {
                messages: vec!["70"],
            }),
            Normalizer::new(),
            clock(),
            8,
            stats.clone(),
        )
        .unwrap();

        wait_until_stopped(&actor);
        assert!(actor.failed());
        assert_eq!(stats.snapshot().transport_errors, 1);

        let receiver = actor.receiver().clone();
        assert_eq!(receiver.try_recv().unwrap().bpm, 70.0);
        assert_eq!(
            receiver.recv_timeout(Duration::from_millis(20)),
            Err(RecvTimeoutError::Timeout)
        );

        actor.join();
        assert_eq!(
            receiver.recv_timeout(Duration::from_millis(20)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_end_of_stream_disconnects() {
        let stats = create_shared_stats();
        let actor = IngestActor::spawn(
            Box::new(LineTransport::new(Cursor::new(b"70\n".to_vec()))),
            Normalizer::new(),
            clock(),
            8,
            stats.clone(),
        )
        .unwrap();

        wait_until_stopped(&actor);
        assert!(!actor.failed());
        assert_eq!(actor.receiver().recv().unwrap().bpm, 70.0);
        assert!(actor.receiver().recv().is_err());
        assert_eq!(stats.snapshot().transport_errors, 0);
    }
}
