//! Bounded registry of the most recent capture files.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::storage::model::CaptureHandle;
use crate::storage::writer::{CAPTURE_FILE_EXT, CAPTURE_FILE_PREFIX};

/// Number of entries kept in the index.
pub const CAPTURE_INDEX_LIMIT: usize = 20;

/// Newest-first list of at most [`CAPTURE_INDEX_LIMIT`] capture handles.
///
/// Entries only point at files; the capture content stays on disk.
#[derive(Debug, Clone, Default)]
pub struct CaptureIndex {
    entries: Vec<CaptureHandle>,
}

impl CaptureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from capture files already present in `dir`.
    ///
    /// Files whose name does not carry a capture timestamp are skipped.
    /// A missing directory yields an empty index.
    pub fn load_from_dir(dir: &Path) -> std::io::Result<Self> {
        let mut index = Self::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != CAPTURE_FILE_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(created_at) = created_at_from_id(id) else {
                debug!("Skipping {}: not a capture file name", path.display());
                continue;
            };
            index.entries.push(CaptureHandle {
                id: id.to_string(),
                created_at,
                storage_path: path.clone(),
            });
        }

        index.sort_and_truncate();
        Ok(index)
    }

    /// Adds a freshly written capture. Re-registering an id is a no-op.
    pub fn register(&mut self, handle: CaptureHandle) {
        if self.entries.iter().any(|e| e.id == handle.id) {
            return;
        }
        self.entries.push(handle);
        self.sort_and_truncate();
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[CaptureHandle] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at list position `index` (0 = newest).
    pub fn get(&self, index: usize) -> Option<&CaptureHandle> {
        self.entries.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&CaptureHandle> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn sort_and_truncate(&mut self) {
        // Ids share a prefix and a fixed-width stamp, so id order breaks
        // ties between captures of the same millisecond.
        self.entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        self.entries.truncate(CAPTURE_INDEX_LIMIT);
    }
}

/// Recovers the capture time from an id such as
/// `pg_queries_20261014_101500_250` or `pg_queries_20261014_101500_250-3`.
///
/// Ids written before millisecond stamps (`pg_queries_20261014_101500`) are
/// accepted too.
pub fn created_at_from_id(id: &str) -> Option<DateTime<Utc>> {
    let stamp = id.strip_prefix(CAPTURE_FILE_PREFIX)?;
    let stamp = stamp.split_once('-').map_or(stamp, |(s, _)| s);

    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S_%3f")
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Capture index shared between the monitoring loop and readers.
#[derive(Debug, Clone, Default)]
pub struct SharedCaptureIndex(Arc<Mutex<CaptureIndex>>);

impl SharedCaptureIndex {
    pub fn new(index: CaptureIndex) -> Self {
        Self(Arc::new(Mutex::new(index)))
    }

    /// Locks the index. A poisoned lock is recovered since the index holds
    /// no invariants a panicking writer could break halfway.
    pub fn lock(&self) -> MutexGuard<'_, CaptureIndex> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current entries, newest first.
    pub fn snapshot(&self) -> Vec<CaptureHandle> {
        self.lock().entries().to_vec()
    }

    pub fn register(&self, handle: CaptureHandle) {
        self.lock().register(handle);
    }
}
