// src/replay/file.rs
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct FileInner {
    path: PathBuf,
    duration: f64,
    ephemeral: bool,
}

impl Drop for FileInner {
    fn drop(&mut self) {
        if !self.ephemeral {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("[replay] removed {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("[replay] failed to remove {:?}: {}", self.path, e),
        }
    }
}

/// Shared handle to an immutable replay file.
///
/// Clones share the same file. An ephemeral file is deleted when the last
/// clone is dropped.
#[derive(Clone)]
pub struct ReplayFile {
    inner: Arc<FileInner>,
}

impl ReplayFile {
    pub fn new(path: PathBuf, duration: f64, ephemeral: bool) -> Self {
        Self {
            inner: Arc::new(FileInner {
                path,
                duration,
                ephemeral,
            }),
        }
    }

    /// File owned by this handle, removed on last drop.
    pub fn ephemeral(path: PathBuf, duration: f64) -> Self {
        Self::new(path, duration, true)
    }

    /// File owned by someone else (e.g. the replay library).
    pub fn persistent(path: PathBuf, duration: f64) -> Self {
        Self::new(path, duration, false)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn duration(&self) -> f64 {
        self.inner.duration
    }

    pub fn is_ephemeral(&self) -> bool {
        self.inner.ephemeral
    }
}

impl fmt::Debug for ReplayFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayFile")
            .field("path", &self.inner.path)
            .field("duration", &self.inner.duration)
            .field("ephemeral", &self.inner.ephemeral)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_removed_on_last_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        std::fs::write(&path, b"x").unwrap();

        let file = ReplayFile::ephemeral(path.clone(), 1.0);
        let shared = file.clone();
        drop(file);
        assert!(path.exists());
        assert!(shared.is_ephemeral());

        drop(shared);
        assert!(!path.exists());
    }

    #[test]
    fn test_persistent_survives_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.mp4");
        std::fs::write(&path, b"x").unwrap();

        let file = ReplayFile::persistent(path.clone(), 2.0);
        assert_eq!(file.duration(), 2.0);
        drop(file);
        assert!(path.exists());
    }

    #[test]
    fn test_missing_file_drop_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let file = ReplayFile::ephemeral(dir.path().join("never-written.mp4"), 0.0);
        drop(file);
    }
}
