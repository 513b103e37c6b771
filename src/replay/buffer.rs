// src/replay/buffer.rs
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use crossbeam::channel::bounded;
use rand::Rng;

use crate::config::BufferConfig;
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::{ReplayError, ReplayResult, format_secs, lock_mutex};

use super::file::ReplayFile;
use super::queue::ReplayQueue;
use super::segment::{DataSegment, SegmentWindow};

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayBufferStats {
    pub has_init_segment: bool,
    pub segments: usize,
    pub start_time: f64,
    pub stop_time: f64,
    pub bytes: usize,
}

struct BufferShared {
    window: Mutex<SegmentWindow>,
    scratch_dir: PathBuf,
    file_extension: String,
}

/// Rolling window of recorder fragments that can be turned into a playable
/// replay file.
///
/// Every call is posted onto the replay queue; the window is only touched
/// from there.
#[derive(Clone)]
pub struct ReplayBuffer {
    queue: ReplayQueue,
    shared: Arc<BufferShared>,
}

impl ReplayBuffer {
    pub fn new(queue: ReplayQueue, config: &BufferConfig) -> Self {
        let buffer = Self {
            queue,
            shared: Arc::new(BufferShared {
                window: Mutex::new(SegmentWindow::new(config.window_secs)),
                scratch_dir: config.scratch_dir(),
                file_extension: config.file_extension.clone(),
            }),
        };
        buffer.info(&format!(
            "created window={}s scratch={:?}",
            format_secs(config.window_secs),
            buffer.shared.scratch_dir
        ));
        buffer
    }

    /// Must be called again whenever the recorder's encoding parameters
    /// change. Drops every buffered fragment.
    pub fn set_init_segment(&self, data: impl Into<Bytes>) {
        let data = data.into();
        let this = self.clone();
        self.queue.post(move || {
            let mut window = lock_mutex(&this.shared.window, "ReplayBuffer::set_init_segment");
            let dropped = window.len();
            window.set_init_segment(data);
            drop(window);
            this.debug(&format!("new init segment, dropped {} fragment(s)", dropped));
        });
    }

    pub fn append_data_segment(&self, segment: DataSegment) {
        let this = self.clone();
        self.queue.post(move || {
            let mut window = lock_mutex(&this.shared.window, "ReplayBuffer::append");
            let evicted = window.append(segment);
            if evicted > 0 {
                let (start, stop) = (window.start_time(), window.stop_time());
                drop(window);
                this.debug(&format!(
                    "evicted {} fragment(s), window {}..{}",
                    evicted,
                    format_secs(start),
                    format_secs(stop)
                ));
            }
        });
    }

    /// Materializes the current window into a new ephemeral replay file.
    ///
    /// `completion` runs on the replay queue and receives `None` when the
    /// buffer is empty or the file could not be written.
    pub fn create_file<F>(&self, completion: F)
    where
        F: FnOnce(Option<ReplayFile>) + Send + 'static,
    {
        let this = self.clone();
        self.queue.post(move || {
            let file = match this.create_file_internal() {
                Ok(file) => Some(file),
                Err(ReplayError::CacheEmpty) => {
                    this.debug("create_file: nothing buffered");
                    None
                }
                Err(e) => {
                    this.warn(&format!("create_file failed: {}", e));
                    None
                }
            };
            completion(file);
        });
    }

    /// `create_file` for callers off the queue. Blocks until the file is
    /// written.
    pub fn create_file_blocking(&self) -> Option<ReplayFile> {
        if self.queue.is_current() {
            self.error("create_file_blocking called on the replay queue");
            return None;
        }
        let (tx, rx) = bounded(1);
        self.create_file(move |file| {
            let _ = tx.send(file);
        });
        rx.recv().ok().flatten()
    }

    pub fn stats<F>(&self, completion: F)
    where
        F: FnOnce(ReplayBufferStats) + Send + 'static,
    {
        let this = self.clone();
        self.queue.post(move || {
            let stats = this.snapshot();
            completion(stats);
        });
    }

    pub fn stats_blocking(&self) -> Option<ReplayBufferStats> {
        let this = self.clone();
        self.queue.sync(move || this.snapshot())
    }

    fn snapshot(&self) -> ReplayBufferStats {
        let window = lock_mutex(&self.shared.window, "ReplayBuffer::stats");
        ReplayBufferStats {
            has_init_segment: window.init_segment().is_some(),
            segments: window.len(),
            start_time: window.start_time(),
            stop_time: window.stop_time(),
            bytes: window.payload_bytes(),
        }
    }

    fn create_file_internal(&self) -> ReplayResult<ReplayFile> {
        let window = lock_mutex(&self.shared.window, "ReplayBuffer::create_file");
        if window.init_segment().is_none() || window.is_empty() {
            return Err(ReplayError::CacheEmpty);
        }

        let path = self.scratch_path();
        // A failed write leaves the partial file behind.
        let duration = window.write_to(&path)?;
        let segments = window.len();
        drop(window);

        self.info(&format!(
            "created {:?} from {} fragment(s), duration {}s",
            path,
            segments,
            format_secs(duration)
        ));
        Ok(ReplayFile::ephemeral(path, duration))
    }

    fn scratch_path(&self) -> PathBuf {
        let id: u64 = rand::thread_rng().r#gen();
        self.shared
            .scratch_dir
            .join(format!("replay-{:016x}.{}", id, self.shared.file_extension))
    }
}

impl ComponentLogger for ReplayBuffer {
    fn log_context(&self) -> LogContext {
        LogContext::new("ReplayBuffer", self.queue.name())
    }
}
