//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait lets the sampler read either the real `/proc`
//! filesystem on Linux or a mock implementation in tests.

use std::io;
use std::path::Path;

/// Read-only filesystem access used by [`SystemSampler`](super::SystemSampler).
pub trait FileSystem: Send {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_real_fs_read_to_string() {
        let fs = RealFs::new();
        // Read Cargo.toml which should exist in project root
        let cargo_toml = env::current_dir().unwrap().join("Cargo.toml");
        let content = fs.read_to_string(&cargo_toml).unwrap();
        assert!(content.contains("[package]"));
    }

    #[test]
    fn test_real_fs_missing_file() {
        let fs = RealFs::new();
        assert!(fs.read_to_string(Path::new("/nonexistent/path/12345")).is_err());
    }
}
