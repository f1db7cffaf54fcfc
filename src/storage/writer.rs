//! Capture log files: one human-readable file per capture.
//!
//! Files are named `pg_queries_<YYYYmmdd_HHMMSS_mmm>.log`. A `-N` suffix is
//! appended when the millisecond stamp was already used by this writer or a
//! file with that name already exists. Content goes to a `.tmp` sibling first
//! and is hard-linked into place, so readers never observe a partial capture
//! and an existing file is never replaced.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::fmt::{format_elapsed, format_timestamp, or_dash};
use crate::storage::model::{CaptureHandle, CaptureRecord};

/// Prefix of every capture file name.
pub const CAPTURE_FILE_PREFIX: &str = "pg_queries_";
/// Extension of every capture file name.
pub const CAPTURE_FILE_EXT: &str = "log";
/// Line separating query blocks.
pub(crate) const SEPARATOR_WIDTH: usize = 80;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
/// Names tried before a lost race is reported as a write failure.
const NAME_ATTEMPTS: u32 = 8;

/// Error writing a capture to disk.
#[derive(Debug)]
pub enum WriteError {
    /// Storage is unwritable (missing permissions, disk full, ...).
    WriteFailure { path: PathBuf, source: io::Error },
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::WriteFailure { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::WriteFailure { source, .. } => Some(source),
        }
    }
}

/// Writes capture records into a log directory.
pub struct CaptureWriter {
    log_dir: PathBuf,
    /// Millisecond stamp of the previous capture and how many suffixes it used.
    last_stamp: Option<(String, u32)>,
}

impl CaptureWriter {
    /// Creates a writer for `log_dir`, removing `pg_queries_*.log.tmp`
    /// leftovers from an interrupted write.
    ///
    /// The directory itself is created lazily on the first write so that a
    /// missing or unwritable directory surfaces as a [`WriteError`] rather than
    /// at construction.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let log_dir = log_dir.into();

        if let Ok(entries) = std::fs::read_dir(&log_dir) {
            for entry in entries.flatten() {
                if is_capture_tmp(&entry.file_name().to_string_lossy()) {
                    debug!("Removing stale {}", entry.path().display());
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }

        Self {
            log_dir,
            last_stamp: None,
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Writes `record` and returns its handle.
    ///
    /// `id` and `storage_path` of the draft are ignored and replaced by the
    /// values assigned here.
    pub fn write(&mut self, record: &CaptureRecord) -> Result<CaptureHandle, WriteError> {
        std::fs::create_dir_all(&self.log_dir).map_err(|source| WriteError::WriteFailure {
            path: self.log_dir.clone(),
            source,
        })?;

        let content = render_capture(record);
        let mut written = record.clone();

        let mut attempt = 1;
        loop {
            let id = self.next_id(record.created_at);
            let path = self.log_dir.join(file_name(&id));
            let tmp_path = path.with_extension(format!("{}.tmp", CAPTURE_FILE_EXT));

            match persist(&tmp_path, &path, content.as_bytes()) {
                Ok(()) => {
                    written.id = id;
                    written.storage_path = path;
                    break;
                }
                // Another writer took the name after `next_id` checked it.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < NAME_ATTEMPTS => {
                    warn!("Capture name {} taken concurrently, retrying", id);
                    attempt += 1;
                }
                Err(source) => return Err(WriteError::WriteFailure { path, source }),
            }
        }

        debug!(
            "Capture {} written ({} queries, {} bytes)",
            written.id,
            written.queries.len(),
            content.len()
        );
        Ok(written.handle())
    }

    /// Derives a capture id from `created_at` that is unique for this writer
    /// and does not collide with files already in the directory.
    fn next_id(&mut self, created_at: DateTime<Utc>) -> String {
        let stamp = created_at.format(STAMP_FORMAT).to_string();

        let mut suffix = match &self.last_stamp {
            Some((last, used)) if *last == stamp => used + 1,
            _ => 0,
        };
        loop {
            let id = capture_id(&stamp, suffix);
            if !self.log_dir.join(file_name(&id)).exists() {
                self.last_stamp = Some((stamp, suffix));
                return id;
            }
            warn!("Capture file for {} already exists, picking next suffix", id);
            suffix += 1;
        }
    }
}

fn capture_id(stamp: &str, suffix: u32) -> String {
    if suffix == 0 {
        format!("{}{}", CAPTURE_FILE_PREFIX, stamp)
    } else {
        format!("{}{}-{}", CAPTURE_FILE_PREFIX, stamp, suffix)
    }
}

/// File name for a capture id.
pub fn file_name(id: &str) -> String {
    format!("{}.{}", id, CAPTURE_FILE_EXT)
}

/// Writes `content` to `tmp_path` and links it to `path`. The link fails
/// when `path` exists, so a capture file is never replaced.
fn persist(tmp_path: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)?;
    let result = file
        .write_all(content)
        .and_then(|()| file.sync_all())
        .and_then(|()| std::fs::hard_link(tmp_path, path));
    drop(file);
    let _ = std::fs::remove_file(tmp_path);
    result
}

/// Whether `name` is a temporary file left by this writer.
fn is_capture_tmp(name: &str) -> bool {
    name.starts_with(CAPTURE_FILE_PREFIX)
        && name
            .strip_suffix(".tmp")
            .is_some_and(|rest| rest.ends_with(&format!(".{}", CAPTURE_FILE_EXT)))
}

/// Number of `\n`-separated lines `sql` spans in a capture file.
pub(crate) fn sql_line_count(sql: &str) -> usize {
    sql.split('\n').count()
}

/// Renders the capture file body.
pub fn render_capture(record: &CaptureRecord) -> String {
    let mut out = String::new();
    let load = &record.load_at_capture;

    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "--- Active PostgreSQL queries at {} ---",
        format_timestamp(record.created_at)
    );
    out.push('\n');
    let _ = writeln!(out, "Server: {}:{}", record.server.host, record.server.port);
    let _ = writeln!(out, "Database: {}", record.server.database);
    let _ = writeln!(
        out,
        "Load average: {:.2}, {:.2}, {:.2}",
        load.load1, load.load5, load.load15
    );
    let _ = writeln!(
        out,
        "CPU: {:.1}%  Memory: {:.1}%",
        load.cpu_percent, load.mem_percent
    );
    out.push('\n');

    for (i, q) in record.queries.iter().enumerate() {
        let _ = writeln!(out, "[Query {}]", i + 1);
        let _ = writeln!(out, "PID: {}", q.pid);
        let _ = writeln!(out, "User: {}", q.user);
        let _ = writeln!(out, "Database: {}", q.database);
        let _ = writeln!(out, "Client address: {}", or_dash(q.client_address.as_deref()));
        let _ = writeln!(out, "State: {}", q.state);
        let _ = writeln!(out, "Start time: {}", format_timestamp(q.started_at));
        let _ = writeln!(out, "Duration: {}", format_elapsed(q.duration));
        let _ = writeln!(
            out,
            "Waiting: {} / {}",
            or_dash(q.wait_event_type.as_deref()),
            or_dash(q.wait_event.as_deref())
        );
        // The line count lets the reader take SQL verbatim, separator-like
        // lines included.
        let _ = writeln!(out, "SQL lines: {}", sql_line_count(&q.sql_text));
        let _ = writeln!(out, "SQL: {}", q.sql_text);
        let _ = writeln!(out, "{}", "-".repeat(SEPARATOR_WIDTH));
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::{ActiveQueryRecord, LoadSample, ServerInfo};
    use std::time::Duration;
    use tempfile::tempdir;

    fn at(secs: i64, millis: u32) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, millis * 1_000_000).unwrap()
    }

    fn draft(created_at: DateTime<Utc>) -> CaptureRecord {
        CaptureRecord::draft(
            created_at,
            ServerInfo {
                host: "db.local".to_string(),
                port: 5432,
                database: "app".to_string(),
            },
            LoadSample {
                load1: 2.456,
                load5: 1.8,
                load15: 1.0,
                cpu_percent: 87.5,
                mem_percent: 41.0,
                taken_at: created_at,
            },
            vec![ActiveQueryRecord {
                pid: 4242,
                user: "app".to_string(),
                database: "app".to_string(),
                client_address: Some("10.0.0.5".to_string()),
                state: "active".to_string(),
                started_at: at(1_760_000_000, 0),
                duration: Duration::from_secs(90),
                wait_event_type: Some("Lock".to_string()),
                wait_event: Some("relation".to_string()),
                sql_text: "SELECT * FROM orders".to_string(),
            }],
        )
    }

    #[test]
    fn render_has_fixed_field_order() {
        let record = draft(at(1_760_000_090, 0));
        let text = render_capture(&record);

        let labels = [
            "[Query 1]",
            "PID: 4242",
            "User: app",
            "Database: app",
            "Client address: 10.0.0.5",
            "State: active",
            "Start time: ",
            "Duration: 0:01:30.000000",
            "Waiting: Lock / relation",
            "SQL lines: 1",
            "SQL: SELECT * FROM orders",
        ];
        let mut pos = text.find("[Query 1]").unwrap();
        for label in labels {
            let found = text[pos..].find(label).unwrap_or_else(|| panic!("{label}"));
            pos += found;
        }
        assert!(text.contains("Server: db.local:5432"));
        assert!(text.contains("Load average: 2.46, 1.80, 1.00"));
        assert!(text.contains(&format!("\n{}\n", "-".repeat(80))));
    }

    #[test]
    fn render_uses_dash_for_missing_values() {
        let mut record = draft(at(1_760_000_090, 0));
        record.queries[0].client_address = None;
        record.queries[0].wait_event_type = None;
        record.queries[0].wait_event = None;
        let text = render_capture(&record);
        assert!(text.contains("Client address: -\n"));
        assert!(text.contains("Waiting: - / -\n"));
    }

    #[test]
    fn write_creates_file_and_returns_handle() {
        let dir = tempdir().unwrap();
        let mut writer = CaptureWriter::new(dir.path().join("logs"));

        let handle = writer.write(&draft(at(1_760_000_090, 250))).unwrap();
        assert_eq!(handle.id, "pg_queries_20251009_085450_250");
        assert!(handle.storage_path.exists());
        assert_eq!(handle.created_at, at(1_760_000_090, 250));

        let content = std::fs::read_to_string(&handle.storage_path).unwrap();
        assert!(content.contains("PID: 4242"));
    }

    #[test]
    fn rapid_captures_get_distinct_ids() {
        let dir = tempdir().unwrap();
        let mut writer = CaptureWriter::new(dir.path());
        let ts = at(1_760_000_090, 250);

        let a = writer.write(&draft(ts)).unwrap();
        let b = writer.write(&draft(ts)).unwrap();
        let c = writer.write(&draft(ts)).unwrap();

        assert_ne!(a.storage_path, b.storage_path);
        assert_ne!(b.storage_path, c.storage_path);
        assert!(b.id.ends_with("-1"));
        assert!(c.id.ends_with("-2"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("pg_queries_20251009_085450_250.log");
        std::fs::write(&existing, "operator notes").unwrap();

        let mut writer = CaptureWriter::new(dir.path());
        let handle = writer.write(&draft(at(1_760_000_090, 250))).unwrap();

        assert_eq!(handle.id, "pg_queries_20251009_085450_250-1");
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "operator notes");
    }

    #[test]
    fn unwritable_directory_is_write_failure() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let mut writer = CaptureWriter::new(blocker.join("logs"));
        let err = writer.write(&draft(at(1_760_000_090, 0))).unwrap_err();
        assert!(matches!(err, WriteError::WriteFailure { .. }));
    }

    #[test]
    fn new_removes_stale_tmp_files() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("pg_queries_20251009_085450_250.log.tmp");
        std::fs::write(&stale, "partial").unwrap();

        let unrelated = dir.path().join("operator.tmp");
        std::fs::write(&unrelated, "keep").unwrap();

        let _writer = CaptureWriter::new(dir.path());
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn persist_refuses_to_replace_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pg_queries_20251009_085450_250.log");
        let tmp = dir.path().join("pg_queries_20251009_085450_250.log.tmp");
        std::fs::write(&path, "first capture").unwrap();

        let err = persist(&tmp, &path, b"second capture").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first capture");
        assert!(!tmp.exists());
    }

    #[test]
    fn persist_leaves_only_final_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pg_queries_20251009_085450_250.log");
        let tmp = dir.path().join("pg_queries_20251009_085450_250.log.tmp");

        persist(&tmp, &path, b"capture").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "capture");
        assert!(!tmp.exists());
    }
}
