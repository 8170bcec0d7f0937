use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Removes its file when dropped.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    /// Reserve a unique path under `dir`. The file itself is created by the caller.
    pub fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            path: dir.join(format!("{}-{}.part", prefix, Uuid::new_v4().simple())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temp file"),
        }
    }
}
