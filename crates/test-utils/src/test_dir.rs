//! Temporary directory management for tests.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A managed temporary directory, cleaned up on drop.
///
/// # Example
///
/// ```
/// use quarry_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let catalog_path = dir.join("sys.redb");
/// // ... open a RedbBackend at catalog_path ...
/// // Removed when `dir` goes out of scope.
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates a fresh temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: TempDir::new().expect("failed to create temp directory") }
    }

    /// The directory's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Joins a relative path onto the directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
