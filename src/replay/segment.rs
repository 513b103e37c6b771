// src/replay/segment.rs
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;

use crate::core::{ReplayError, ReplayResult};

/// One encoded fragment covering `[start_time, start_time + duration)`.
#[derive(Clone, Debug)]
pub struct DataSegment {
    pub start_time: f64,
    pub duration: f64,
    pub payload: Bytes,
}

impl DataSegment {
    pub fn new(start_time: f64, duration: f64, payload: impl Into<Bytes>) -> Self {
        Self {
            start_time,
            duration,
            payload: payload.into(),
        }
    }

    pub fn stop_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Init segment plus the retained fragments, trimmed to `window` seconds.
///
/// Not thread safe on its own; `ReplayBuffer` only touches it from the
/// replay queue.
#[derive(Debug)]
pub struct SegmentWindow {
    window: f64,
    init_segment: Option<Bytes>,
    segments: VecDeque<DataSegment>,
}

impl SegmentWindow {
    pub fn new(window: f64) -> Self {
        Self {
            window,
            init_segment: None,
            segments: VecDeque::new(),
        }
    }

    /// Stores a new init segment. Buffered fragments were encoded against the
    /// previous one and are dropped.
    pub fn set_init_segment(&mut self, data: Bytes) {
        self.init_segment = Some(data);
        self.segments.clear();
    }

    pub fn init_segment(&self) -> Option<&Bytes> {
        self.init_segment.as_ref()
    }

    /// Appends and evicts from the front until the span fits the window.
    /// Returns the number of evicted fragments.
    pub fn append(&mut self, segment: DataSegment) -> usize {
        self.segments.push_back(segment);
        let mut evicted = 0;
        while self.span() > self.window {
            if self.segments.pop_front().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    pub fn start_time(&self) -> f64 {
        self.segments.front().map_or(0.0, |s| s.start_time)
    }

    pub fn stop_time(&self) -> f64 {
        self.segments.back().map_or(0.0, |s| s.stop_time())
    }

    pub fn span(&self) -> f64 {
        self.stop_time() - self.start_time()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &DataSegment> {
        self.segments.iter()
    }

    pub fn payload_bytes(&self) -> usize {
        self.init_segment.as_ref().map_or(0, |b| b.len())
            + self.segments.iter().map(|s| s.payload.len()).sum::<usize>()
    }

    /// Writes init segment followed by every payload to a new file at `path`
    /// and returns the summed duration. An existing file is never replaced.
    /// Nothing is removed on failure.
    pub fn write_to(&self, path: &Path) -> ReplayResult<f64> {
        let init = match self.init_segment.as_ref() {
            Some(init) if !self.segments.is_empty() => init,
            _ => return Err(ReplayError::CacheEmpty),
        };

        let ctx = || format!("write {}", path.display());
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| ReplayError::io(ctx(), e))?;
        let mut out = BufWriter::new(file);

        out.write_all(init).map_err(|e| ReplayError::io(ctx(), e))?;
        let mut duration = 0.0;
        for segment in &self.segments {
            out.write_all(&segment.payload)
                .map_err(|e| ReplayError::io(ctx(), e))?;
            duration += segment.duration;
        }
        out.flush().map_err(|e| ReplayError::io(ctx(), e))?;

        Ok(duration)
    }
}
