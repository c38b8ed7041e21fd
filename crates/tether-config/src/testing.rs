//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage temporary metadata directories so
//! concurrent tests never share a files dir.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with a unique metadata directory
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated file-metadata directory
    pub files_dir: PathBuf,
    /// Directory for local source files
    pub source_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let files_dir = root.join("files");
        let source_dir = root.join("sources");
        std::fs::create_dir_all(&files_dir)?;
        std::fs::create_dir_all(&source_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            files_dir,
            source_dir,
            test_id,
        })
    }

    /// Build a config rooted in this environment, testing mode on.
    pub fn config(&self) -> crate::Config {
        let mut cfg = crate::Config::default();
        cfg.renter.files_dir = self.files_dir.clone();
        cfg.upload.testing = true;
        cfg
    }

    /// Create a local source file with the given content
    pub fn create_source(&self, name: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.source_dir.join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
