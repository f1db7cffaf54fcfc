//! In-memory mock filesystem for testing the sampler without real `/proc`.

use crate::collector::traits::FileSystem;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// In-memory filesystem for testing.
///
/// Each path holds a queue of contents: reads return the front entry and
/// advance while more than one remains, so a test can script how a counter
/// file such as `/proc/stat` changes between two reads.
#[derive(Debug, Default)]
pub struct MockFs {
    files: Mutex<HashMap<PathBuf, VecDeque<String>>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the content of a file, replacing any scripted sequence.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .insert(path.as_ref().to_path_buf(), VecDeque::from([content.into()]));
    }

    /// Queues another content for a file. The last queued value sticks.
    pub fn push_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .entry(path.as_ref().to_path_buf())
            .or_default()
            .push_back(content.into());
    }

    /// Removes a file.
    pub fn remove_file(&mut self, path: impl AsRef<Path>) {
        self.files
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .remove(path.as_ref());
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let mut files = self.files.lock().unwrap_or_else(|p| p.into_inner());
        let queue = files.get_mut(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("mock file not found: {}", path.display()),
            )
        })?;

        if queue.len() > 1 {
            // Length checked above.
            Ok(queue.pop_front().unwrap_or_default())
        } else {
            Ok(queue.front().cloned().unwrap_or_default())
        }
    }
}
