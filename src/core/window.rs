//! Trailing-window views over the append log.
//!
//! The window is never kept as authoritative in-memory state; it is always
//! derived from the log so a restarted process recovers it by re-reading
//! the file. Two strategies are provided:
//!
//! - [`WindowReader`] rescans the whole file on every call.
//! - [`TailingWindow`] replays the file once, then only reads bytes appended
//!   since the previous refresh and keeps the live window in a ring buffer.
//!
//! Both skip lines they cannot parse, including a final line that is still
//! being written, and both return entries indexed 0.. in scan order.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::store::{FIELD_SEPARATOR, TIMESTAMP_FORMAT};
use crate::error::Result;
use crate::ingest::{Normalizer, Record};

/// Longest supported window span, about a century.
const MAX_SPAN_WEEKS: i64 = 52 * 100;

/// The longest span in seconds, for validating configured windows.
pub const MAX_WINDOW_SECS: u64 = MAX_SPAN_WEEKS as u64 * 7 * 24 * 60 * 60;

/// One record inside the window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry {
    /// Position in scan order; the x-axis used downstream
    pub index: usize,
    /// Stamp from the log line prefix
    pub timestamp: NaiveDateTime,
    pub record: Record,
}

/// How the scheduler derives the window each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Rescan the whole log on each read
    #[default]
    Scan,
    /// Follow the log incrementally with an in-memory ring buffer
    Tail,
}

impl FromStr for WindowMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scan" => Ok(WindowMode::Scan),
            "tail" => Ok(WindowMode::Tail),
            other => Err(format!("unknown window mode '{other}'")),
        }
    }
}

/// Convert a configured duration into a window span, capped at
/// [`MAX_WINDOW_SECS`].
pub fn span(duration: std::time::Duration) -> Duration {
    let max = Duration::weeks(MAX_SPAN_WEEKS);
    Duration::from_std(duration)
        .ok()
        .filter(|span| *span <= max)
        .unwrap_or(max)
}

/// Whether a stamp lies in `[as_of - span, as_of]`.
fn in_window(timestamp: NaiveDateTime, as_of: NaiveDateTime, span: Duration) -> bool {
    let age = as_of - timestamp;
    age >= Duration::zero() && age <= span
}

/// Parse one complete log line (terminator already stripped).
fn parse_line(line: &[u8], normalizer: &Normalizer) -> Option<(NaiveDateTime, Record)> {
    let line = std::str::from_utf8(line).ok()?.trim_end_matches(['\n', '\r']);
    let (stamp, body) = line.split_once(FIELD_SEPARATOR)?;
    let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    let record = normalizer.normalize(body.as_bytes(), timestamp).ok()?;
    record.has_signal().then_some((timestamp, record))
}

/// Read complete lines from `reader`, stopping before an unterminated tail.
///
/// Returns the number of bytes consumed by complete lines.
fn read_complete_lines<R: BufRead>(
    reader: &mut R,
    normalizer: &Normalizer,
    mut on_entry: impl FnMut(NaiveDateTime, Record),
) -> Result<u64> {
    let mut consumed = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 || line.last() != Some(&b'\n') {
            break;
        }
        consumed += n as u64;

        match parse_line(&line, normalizer) {
            Some((timestamp, record)) => on_entry(timestamp, record),
            None => tracing::trace!(len = n, "skipping unparsable log line"),
        }
    }

    Ok(consumed)
}

fn index_entries<'a>(
    entries: impl IntoIterator<Item = &'a (NaiveDateTime, Record)>,
    as_of: NaiveDateTime,
    span: Duration,
) -> Vec<WindowEntry> {
    entries
        .into_iter()
        .filter(|(timestamp, _)| in_window(*timestamp, as_of, span))
        .enumerate()
        .map(|(index, (timestamp, record))| WindowEntry {
            index,
            timestamp: *timestamp,
            record: record.clone(),
        })
        .collect()
}

/// Stamp of the last parsable line of a log.
pub fn last_timestamp(path: &Path) -> Result<Option<NaiveDateTime>> {
    let normalizer = Normalizer::new();
    let mut reader = BufReader::new(File::open(path)?);
    let mut last = None;
    read_complete_lines(&mut reader, &normalizer, |timestamp, _| {
        last = Some(timestamp);
    })?;
    Ok(last)
}

/// Full-scan window reader.
#[derive(Debug, Clone)]
pub struct WindowReader {
    path: PathBuf,
    normalizer: Normalizer,
}

impl WindowReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            normalizer: Normalizer::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records stamped within `duration` before `as_of`, in log order.
    pub fn read_window(
        &self,
        duration: std::time::Duration,
        as_of: NaiveDateTime,
    ) -> Result<Vec<WindowEntry>> {
        let span = span(duration);
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut index = 0;
        let mut entries = Vec::new();

        read_complete_lines(&mut reader, &self.normalizer, |timestamp, record| {
            if in_window(timestamp, as_of, span) {
                entries.push(WindowEntry {
                    index,
                    timestamp,
                    record,
                });
                index += 1;
            }
        })?;

        Ok(entries)
    }
}

/// Incrementally maintained window over a growing log.
///
/// `as_of` is expected not to move backwards between refreshes; entries that
/// have aged out are evicted for good.
#[derive(Debug)]
pub struct TailingWindow {
    path: PathBuf,
    normalizer: Normalizer,
    span: Duration,
    offset: u64,
    buffer: VecDeque<(NaiveDateTime, Record)>,
}

impl TailingWindow {
    /// Follow the log at `path`. The first refresh replays it from the start.
    pub fn new(path: impl Into<PathBuf>, duration: std::time::Duration) -> Self {
        Self {
            path: path.into(),
            normalizer: Normalizer::new(),
            span: span(duration),
            offset: 0,
            buffer: VecDeque::new(),
        }
    }

    /// Number of records currently buffered, including any stamped after the
    /// last `as_of`.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pull newly appended lines and return the window as of `as_of`.
    pub fn refresh(&mut self, as_of: NaiveDateTime) -> Result<Vec<WindowEntry>> {
        let mut file = File::open(&self.path)?;

        let len = file.metadata()?.len();
        if len < self.offset {
            tracing::warn!(path = %self.path.display(), "log shrank, replaying from start");
            self.offset = 0;
            self.buffer.clear();
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(file);
        // `None` when the span reaches past the earliest representable time.
        let horizon = as_of.checked_sub_signed(self.span);
        let buffer = &mut self.buffer;
        let consumed = read_complete_lines(&mut reader, &self.normalizer, |timestamp, record| {
            if horizon.map_or(true, |h| timestamp >= h) {
                buffer.push_back((timestamp, record));
            }
        })?;
        self.offset += consumed;

        while let Some((timestamp, _)) = self.buffer.front() {
            if horizon.map_or(false, |h| *timestamp < h) {
                self.buffer.pop_front();
            } else {
                break;
            }
        }

        Ok(index_entries(&self.buffer, as_of, self.span))
    }
}
