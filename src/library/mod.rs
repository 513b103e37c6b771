// src/library/mod.rs
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::{ReplayError, ReplayResult, format_secs};
use crate::replay::ReplayFile;

const INDEX_FILE: &str = "replays.json";

/// A replay clip kept in the library.
///
/// `start` and `stop` are positions inside the replay window, counted from
/// the window's beginning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedReplay {
    pub id: String,
    pub created: String,
    pub start: f64,
    pub stop: f64,
    pub duration: f64,
    pub window: f64,
    pub file_name: String,
}

impl SavedReplay {
    pub fn start_from_end(&self) -> f64 {
        self.window - self.start
    }

    /// Offset into the file that corresponds to `start`.
    pub fn start_from_video_start(&self) -> f64 {
        (self.duration - self.start_from_end()).max(0.0)
    }

    pub fn stop_from_video_start(&self) -> f64 {
        (self.duration - (self.window - self.stop)).max(0.0)
    }

    pub fn thumbnail_offset(&self) -> f64 {
        self.start_from_video_start()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryIndex {
    replays: Vec<SavedReplay>,
}

/// Saved replay clips in a directory, indexed by `replays.json`.
pub struct ReplayLibrary {
    dir: PathBuf,
    window: f64,
    index: LibraryIndex,
}

impl ReplayLibrary {
    pub fn open(dir: impl Into<PathBuf>, window: f64) -> ReplayResult<Self> {
        if !window.is_finite() || window <= 0.0 {
            return Err(ReplayError::config(format!(
                "library window must be a positive number of seconds (got {})",
                window
            )));
        }
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| ReplayError::io(format!("create {}", dir.display()), e))?;

        let index_path = dir.join(INDEX_FILE);
        let index = match fs::read(&index_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ReplayError::library(format!("parse {}", index_path.display()), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LibraryIndex::default(),
            Err(e) => return Err(ReplayError::io(format!("read {}", index_path.display()), e)),
        };

        let library = Self { dir, window, index };
        library.info(&format!("opened with {} replay(s)", library.index.replays.len()));
        Ok(library)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list(&self) -> &[SavedReplay] {
        &self.index.replays
    }

    pub fn get(&self, id: &str) -> Option<&SavedReplay> {
        self.index.replays.iter().find(|r| r.id == id)
    }

    /// Copies `file` into the library with the selected interval.
    pub fn save(&mut self, file: &ReplayFile, start: f64, stop: f64) -> ReplayResult<SavedReplay> {
        // The index is JSON; non-finite numbers would not read back.
        if !start.is_finite() || !stop.is_finite() || !file.duration().is_finite() {
            return Err(ReplayError::config(format!(
                "replay interval {}..{} of a {}s file is not finite",
                start,
                stop,
                file.duration()
            )));
        }
        let clamp = |v: f64| v.clamp(0.0, self.window);
        let (start, stop) = (clamp(start.min(stop)), clamp(start.max(stop)));

        let now = Utc::now();
        let suffix: u16 = rand::thread_rng().r#gen();
        let id = format!("{}-{:04x}", now.format("%Y%m%d-%H%M%S"), suffix);
        let file_name = format!("{}.mp4", id);
        let target = self.dir.join(&file_name);

        fs::copy(file.path(), &target).map_err(|e| {
            ReplayError::io(format!("copy {} to {}", file.path().display(), target.display()), e)
        })?;

        let replay = SavedReplay {
            id,
            created: now.to_rfc3339(),
            start,
            stop,
            duration: file.duration(),
            window: self.window,
            file_name,
        };
        self.index.replays.push(replay.clone());

        if let Err(e) = self.persist() {
            self.index.replays.pop();
            let _ = fs::remove_file(&target);
            return Err(e);
        }

        self.info(&format!(
            "saved {} ({}s, {}..{})",
            replay.id,
            format_secs(replay.duration),
            format_secs(replay.start),
            format_secs(replay.stop)
        ));
        Ok(replay)
    }

    /// The saved copy as a file the library keeps owning.
    pub fn open_file(&self, id: &str) -> Option<ReplayFile> {
        let replay = self.get(id)?;
        let path = self.dir.join(&replay.file_name);
        if !path.exists() {
            self.warn(&format!("{} is indexed but {:?} is missing", id, path));
            return None;
        }
        Some(ReplayFile::persistent(path, replay.duration))
    }

    pub fn remove(&mut self, id: &str) -> ReplayResult<bool> {
        let Some(pos) = self.index.replays.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let replay = self.index.replays.remove(pos);
        self.persist()?;

        let path = self.dir.join(&replay.file_name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => self.warn(&format!("failed to remove {:?}: {}", path, e)),
        }
        self.info(&format!("removed {}", id));
        Ok(true)
    }

    fn persist(&self) -> ReplayResult<()> {
        let index_path = self.dir.join(INDEX_FILE);
        let tmp_path = self.dir.join(format!("{}.tmp", INDEX_FILE));

        let json = serde_json::to_vec_pretty(&self.index)
            .map_err(|e| ReplayError::library("serialize replay index", e))?;
        fs::write(&tmp_path, json)
            .map_err(|e| ReplayError::io(format!("write {}", tmp_path.display()), e))?;
        fs::rename(&tmp_path, &index_path)
            .map_err(|e| ReplayError::io(format!("rename to {}", index_path.display()), e))
    }
}

impl ComponentLogger for ReplayLibrary {
    fn log_context(&self) -> LogContext {
        LogContext::new("ReplayLibrary", &self.dir.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(start: f64, stop: f64, duration: f64) -> SavedReplay {
        SavedReplay {
            id: "x".to_string(),
            created: String::new(),
            start,
            stop,
            duration,
            window: 30.0,
            file_name: "x.mp4".to_string(),
        }
    }

    fn source_file(dir: &Path, duration: f64) -> ReplayFile {
        let path = dir.join("source.mp4");
        fs::write(&path, b"clip").unwrap();
        ReplayFile::persistent(path, duration)
    }

    #[test]
    fn test_open_rejects_bad_window() {
        let dir = tempfile::tempdir().unwrap();
        for window in [-1.0, 0.0, f64::NAN, f64::INFINITY] {
            let result = ReplayLibrary::open(dir.path().join("lib"), window);
            assert!(matches!(result, Err(ReplayError::Config { .. })), "window {}", window);
        }
    }

    #[test]
    fn test_save_rejects_non_finite_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut library = ReplayLibrary::open(dir.path().join("lib"), 30.0).unwrap();
        let file = source_file(dir.path(), 12.0);

        assert!(library.save(&file, f64::NAN, f64::NAN).is_err());
        assert!(library.save(&file, 0.0, f64::INFINITY).is_err());
        let bad_duration = source_file(dir.path(), f64::NAN);
        assert!(library.save(&bad_duration, 0.0, 10.0).is_err());

        // Nothing was copied and the index still reads back.
        assert!(library.list().is_empty());
        assert_eq!(fs::read_dir(library.dir()).unwrap().count(), 0);
        let saved = library.save(&file, 5.0, 10.0).unwrap();
        let reopened = ReplayLibrary::open(dir.path().join("lib"), 30.0).unwrap();
        assert_eq!(reopened.get(&saved.id), Some(&saved));
    }

    #[test]
    fn test_offsets_for_full_window() {
        let r = replay(20.0, 30.0, 30.0);
        assert_eq!(r.start_from_end(), 10.0);
        assert_eq!(r.thumbnail_offset(), 20.0);
        assert_eq!(r.stop_from_video_start(), 30.0);
    }

    #[test]
    fn test_offsets_for_short_buffer() {
        // Only 12s were buffered when the replay was saved.
        let r = replay(20.0, 30.0, 12.0);
        assert_eq!(r.thumbnail_offset(), 2.0);
        assert_eq!(r.stop_from_video_start(), 12.0);

        let early = replay(5.0, 30.0, 12.0);
        assert_eq!(early.thumbnail_offset(), 0.0);
    }
}
