//! Display boundary: where snapshots go once per tick.
//!
//! Rendering plots is left to whatever consumes the snapshots. The sinks
//! here print labels to a terminal, stream JSON lines to another process,
//! or forward snapshots in-process over a channel.

use crossbeam_channel::{Sender, TrySendError};
use std::io::Write;
use std::str::FromStr;

use crate::core::metrics::{Origin, Reading};
use crate::core::snapshot::MetricsSnapshot;
use crate::error::{HeartError, Result};

/// Shown in place of a value that is missing or invalid.
pub const INVALID_PLACEHOLDER: &str = "--";

/// Consumer of per-tick snapshots.
pub trait SnapshotSink: Send {
    fn publish(&mut self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Format a labelled value, using the placeholder for invalid readings.
///
/// Whole numbers are printed without decimals.
pub fn format_value(label: &str, value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => {
            if v.fract() == 0.0 {
                format!("{label}: {v:.0}")
            } else {
                format!("{label}: {v:.precision$}")
            }
        }
        _ => format!("{label}: {INVALID_PLACEHOLDER}"),
    }
}

fn format_reading(label: &str, reading: Option<Reading>) -> String {
    let text = format_value(label, reading.map(|r| r.value), 2);
    match reading.map(|r| r.origin) {
        Some(Origin::Approximated) => format!("{text} (approx)"),
        _ => text,
    }
}

/// Human-readable one-line-per-tick output.
pub struct ConsoleSink<W> {
    out: W,
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> SnapshotSink for ConsoleSink<W> {
    fn publish(&mut self, snapshot: &MetricsSnapshot) -> Result<()> {
        let line = format!(
            "[{}] {} | {} | {} | {} | window: {} samples{}",
            snapshot.generated_at.format("%H:%M:%S"),
            format_reading("BPM", snapshot.bpm),
            format_reading("IPM", snapshot.ipm),
            format_reading("RMSSD", snapshot.rmssd),
            format_reading("HRSTD", snapshot.hrstd),
            snapshot.window_len,
            if snapshot.stale { " (stale)" } else { "" }
        );
        writeln!(self.out, "{line}").map_err(|e| HeartError::Sink(e.to_string()))?;
        self.out.flush().map_err(|e| HeartError::Sink(e.to_string()))
    }
}

/// One JSON document per line.
pub struct JsonLinesSink<W> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> SnapshotSink for JsonLinesSink<W> {
    fn publish(&mut self, snapshot: &MetricsSnapshot) -> Result<()> {
        serde_json::to_writer(&mut self.out, snapshot)
            .map_err(|e| HeartError::Sink(e.to_string()))?;
        self.out
            .write_all(b"\n")
            .and_then(|()| self.out.flush())
            .map_err(|e| HeartError::Sink(e.to_string()))
    }
}

/// Forwards snapshots to an in-process consumer such as a GUI thread.
///
/// A full channel drops the snapshot; the consumer keeps showing the
/// previous one.
pub struct ChannelSink {
    sender: Sender<MetricsSnapshot>,
}

impl ChannelSink {
    pub fn new(sender: Sender<MetricsSnapshot>) -> Self {
        Self { sender }
    }
}

impl SnapshotSink for ChannelSink {
    fn publish(&mut self, snapshot: &MetricsSnapshot) -> Result<()> {
        match self.sender.try_send(snapshot.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::debug!("display channel full, skipping snapshot");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(HeartError::Sink("display channel closed".to_string()))
            }
        }
    }
}

/// Output format for the command-line sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Console,
    Jsonl,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "console" | "text" => Ok(OutputFormat::Console),
            "jsonl" | "json" => Ok(OutputFormat::Jsonl),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

/// A sink writing to stdout in the given format.
pub fn stdout_sink(format: OutputFormat) -> Box<dyn SnapshotSink> {
    match format {
        OutputFormat::Console => Box::new(ConsoleSink::new(std::io::stdout())),
        OutputFormat::Jsonl => Box::new(JsonLinesSink::new(std::io::stdout())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::{SeriesPoint, WindowMetrics};
    use crate::core::snapshot::SnapshotBuilder;
    use chrono::NaiveDate;

    fn snapshot(stale: bool) -> MetricsSnapshot {
        let metrics = WindowMetrics {
            bpm: Some(Reading::measured(72.0)),
            ipm: Some(Reading::approximated(108.0)),
            rmssd: Some(Reading::computed(3.16227)),
            hrstd: None,
            mean_bpm: Some(70.0),
            series: vec![SeriesPoint {
                index: 0,
                bpm: 72.0,
                ipm: Some(108.0),
            }],
        };
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 5)
            .unwrap();
        SnapshotBuilder::new().build(metrics, at, stale)
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value("BPM", Some(72.0), 2), "BPM: 72");
        assert_eq!(format_value("RMSSD", Some(3.16227), 2), "RMSSD: 3.16");
        assert_eq!(format_value("IPM", Some(-1.0), 2), "IPM: --");
        assert_eq!(format_value("HRSTD", None, 2), "HRSTD: --");
    }

    #[test]
    fn test_console_sink_line() {
        let mut sink = ConsoleSink::new(Vec::new());
        sink.publish(&snapshot(true)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            out,
            "[12:00:05] BPM: 72 | IPM: 108 (approx) | RMSSD: 3.16 | HRSTD: -- | window: 1 samples (stale)\n"
        );
    }

    #[test]
    fn test_json_lines_sink() {
        let published = snapshot(false);
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(&published).unwrap();
        sink.publish(&published).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: MetricsSnapshot = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.generated_at, published.generated_at);
        assert_eq!(parsed.bpm, published.bpm);
        assert_eq!(parsed.ipm, published.ipm);
        assert_eq!(parsed.window_len, 1);
        assert_eq!(parsed.producer, published.producer);
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut sink = ChannelSink::new(tx);

        sink.publish(&snapshot(false)).unwrap();
        sink.publish(&snapshot(false)).unwrap();
        assert_eq!(rx.try_iter().count(), 1);

        drop(rx);
        assert!(sink.publish(&snapshot(false)).is_err());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("jsonl".parse::<OutputFormat>(), Ok(OutputFormat::Jsonl));
        assert_eq!("console".parse::<OutputFormat>(), Ok(OutputFormat::Console));
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
