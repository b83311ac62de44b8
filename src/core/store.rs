//! Durable append-only log of received samples.
//!
//! Each line is `"<YYYY-MM-DD HH:MM:SS> - <body>"` where the body is the
//! record's canonical JSON. The file is the audit trail and also the only
//! source of truth for window recomputation, so the line format must stay
//! stable across runs.
//!
//! A store has exactly one writer (the scheduler). Every append is a single
//! buffered write followed by a flush, so readers opened afterwards observe
//! the whole line.

use chrono::{NaiveDateTime, SubsecRound};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::window;
use crate::error::Result;
use crate::ingest::Record;

/// Timestamp format of the line prefix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Separator between the timestamp prefix and the body.
pub const FIELD_SEPARATOR: &str = " - ";

/// Format of the run start time embedded in log file names.
const FILE_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const FILE_PREFIX: &str = "log_";
const FILE_EXTENSION: &str = "log";

/// Result of an append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The line was written and flushed
    Appended,
    /// The record carried no valid heart rate and was not written
    Rejected,
}

/// Append-only log owned by a single writer.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    writer: BufWriter<File>,
    last_stamp: Option<NaiveDateTime>,
    sync_on_append: bool,
    lines_appended: u64,
}

impl LogStore {
    /// Create the log for a run started at `started_at` inside `dir`.
    ///
    /// An existing file with the same name is truncated.
    pub fn create(dir: &Path, started_at: NaiveDateTime, instance_id: Uuid) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = session_path(dir, started_at);
        let file = File::create(&path)?;

        let mut store = Self::from_file(path, file, None);
        store.write_header(started_at, instance_id)?;
        tracing::info!(path = %store.path.display(), "created log store");
        Ok(store)
    }

    /// Reopen an existing log and continue appending to it.
    pub fn resume(path: &Path) -> Result<Self> {
        let last_stamp = if path.exists() {
            window::last_timestamp(path)?
        } else {
            None
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        tracing::info!(path = %path.display(), last = ?last_stamp, "resumed log store");
        Ok(Self::from_file(path.to_path_buf(), file, last_stamp))
    }

    fn from_file(path: PathBuf, file: File, last_stamp: Option<NaiveDateTime>) -> Self {
        Self {
            path,
            writer: BufWriter::new(file),
            last_stamp,
            sync_on_append: false,
            lines_appended: 0,
        }
    }

    /// Force file data to stable storage after every append.
    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended through this handle.
    pub fn lines_appended(&self) -> u64 {
        self.lines_appended
    }

    /// Append one record observed at `observed_at`.
    ///
    /// Records without a valid heart rate are rejected without touching the
    /// file. Stamps never go backwards: an observation earlier than the last
    /// written line is written with the last line's stamp.
    pub fn append(&mut self, record: &Record, observed_at: NaiveDateTime) -> Result<AppendOutcome> {
        if !record.has_signal() {
            return Ok(AppendOutcome::Rejected);
        }

        let mut stamp = observed_at.trunc_subsecs(0);
        if let Some(last) = self.last_stamp {
            if stamp < last {
                tracing::debug!(%stamp, %last, "clock stepped backwards, clamping log stamp");
                stamp = last;
            }
        }

        let line = format!(
            "{}{}{}\n",
            stamp.format(TIMESTAMP_FORMAT),
            FIELD_SEPARATOR,
            record.body()?
        );
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        if self.sync_on_append {
            self.writer.get_ref().sync_data()?;
        }

        self.last_stamp = Some(stamp);
        self.lines_appended += 1;
        Ok(AppendOutcome::Appended)
    }

    /// Flush and sync the log, consuming the handle.
    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        tracing::info!(
            path = %self.path.display(),
            lines = self.lines_appended,
            "closed log store"
        );
        Ok(())
    }

    fn write_header(&mut self, started_at: NaiveDateTime, instance_id: Uuid) -> Result<()> {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        writeln!(
            self.writer,
            "# heartwatch log opened {} on {host} (run {instance_id})",
            started_at.format(TIMESTAMP_FORMAT)
        )?;
        self.writer.flush()?;
        Ok(())
    }
}

/// File name of the log for a run started at `started_at`.
pub fn session_path(dir: &Path, started_at: NaiveDateTime) -> PathBuf {
    dir.join(format!(
        "{FILE_PREFIX}{}.{FILE_EXTENSION}",
        started_at.format(FILE_STAMP_FORMAT)
    ))
}

/// Most recent run log in `dir`, if any.
///
/// File names embed a sortable start time, so the greatest name wins.
pub fn latest_log(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<PathBuf> = None;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_log = path.is_file()
            && path.extension().map(|e| e == FILE_EXTENSION).unwrap_or(false)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX))
                .unwrap_or(false);
        if is_log && latest.as_ref().map(|l| path > *l).unwrap_or(true) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_create_names_file_after_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::create(dir.path(), start(), Uuid::new_v4()).unwrap();

        assert_eq!(
            store.path().file_name().unwrap(),
            "log_2024-03-01_09-30-00.log"
        );
        assert!(read(store.path()).starts_with("# heartwatch log opened 2024-03-01 09:30:00"));
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = session_path(dir.path(), start());
        std::fs::write(&path, "2024-03-01 09:00:00 - {\"bpm\":60.0}\n").unwrap();

        let store = LogStore::create(dir.path(), start(), Uuid::new_v4()).unwrap();
        assert!(!read(store.path()).contains("09:00:00 - "));
    }

    #[test]
    fn test_append_writes_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LogStore::create(dir.path(), start(), Uuid::new_v4()).unwrap();

        let record = Record::from_bpm(start(), 72.0);
        let outcome = store.append(&record, start() + Duration::seconds(5)).unwrap();

        assert_eq!(outcome, AppendOutcome::Appended);
        let content = read(store.path());
        assert!(content.ends_with("2024-03-01 09:30:05 - {\"bpm\":72.0}\n"));
        assert_eq!(store.lines_appended(), 1);
    }

    #[test]
    fn test_append_rejects_no_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LogStore::create(dir.path(), start(), Uuid::new_v4()).unwrap();
        let before = std::fs::metadata(store.path()).unwrap().len();

        let outcome = store
            .append(&Record::from_bpm(start(), -1.0), start())
            .unwrap();

        assert_eq!(outcome, AppendOutcome::Rejected);
        assert_eq!(std::fs::metadata(store.path()).unwrap().len(), before);
        assert_eq!(store.lines_appended(), 0);
    }

    #[test]
    fn test_stamps_never_go_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LogStore::create(dir.path(), start(), Uuid::new_v4()).unwrap();

        let later = start() + Duration::seconds(10);
        store.append(&Record::from_bpm(later, 70.0), later).unwrap();
        store.append(&Record::from_bpm(start(), 71.0), start()).unwrap();

        let content = read(store.path());
        assert_eq!(content.matches("2024-03-01 09:30:10 - ").count(), 2);
    }

    #[test]
    fn test_resume_continues_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut store = LogStore::create(dir.path(), start(), Uuid::new_v4()).unwrap();
            store.append(&Record::from_bpm(start(), 70.0), start()).unwrap();
            let path = store.path().to_path_buf();
            store.close().unwrap();
            path
        };

        let mut resumed = LogStore::resume(&path).unwrap().with_sync_on_append(true);
        let next = start() + Duration::seconds(1);
        resumed.append(&Record::from_bpm(next, 71.0), next).unwrap();

        let content = read(&path);
        assert!(content.contains("09:30:00 - {\"bpm\":70.0}"));
        assert!(content.contains("09:30:01 - {\"bpm\":71.0}"));
    }

    #[test]
    fn test_latest_log_picks_newest_run() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_log(dir.path()).unwrap(), None);

        LogStore::create(dir.path(), start(), Uuid::new_v4()).unwrap();
        let newer = LogStore::create(dir.path(), start() + Duration::hours(1), Uuid::new_v4())
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(latest_log(dir.path()).unwrap().as_deref(), Some(newer.path()));
    }
}
