// src/replay/job.rs
use std::sync::Arc;

use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::{ReplayError, ReplayResult, format_secs};
use crate::decoders::{AssetReader, ImageConverter, MediaBackend, TrackLoadCallback};
use crate::types::{Image, PixelFormat, TimeRange, VideoTrack};

use super::file::ReplayFile;
use super::queue::ReplayQueue;

/// What a job needs to reach the decoder and the replay queue.
#[derive(Clone)]
pub struct DecodeContext {
    pub queue: ReplayQueue,
    pub backend: Arc<dyn MediaBackend>,
    pub converter: Arc<dyn ImageConverter>,
}

impl DecodeContext {
    pub fn new(
        queue: ReplayQueue,
        backend: Arc<dyn MediaBackend>,
        converter: Arc<dyn ImageConverter>,
    ) -> Self {
        Self {
            queue,
            backend,
            converter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    TracksLoading,
    Reading,
    Completed,
}

/// One attempt at decoding a single frame at `offset`.
pub struct ExtractionJob {
    id: u64,
    owner: String,
    file: ReplayFile,
    offset: f64,
    format: PixelFormat,
    state: JobState,
    reader: Box<dyn AssetReader>,
}

impl ExtractionJob {
    /// Opens a reader over `[offset, offset + read_window)`.
    pub fn new(
        id: u64,
        owner: &str,
        file: ReplayFile,
        offset: f64,
        read_window: f64,
        format: PixelFormat,
        backend: &dyn MediaBackend,
    ) -> ReplayResult<Self> {
        let range = TimeRange::new(offset.max(0.0), read_window);
        let reader = backend
            .open_reader(file.path(), range)
            .map_err(|e| ReplayError::decode(format!("reader for {:?}: {:#}", file.path(), e)))?;

        Ok(Self {
            id,
            owner: owner.to_string(),
            file,
            offset,
            format,
            state: JobState::Created,
            reader,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Starts the asynchronous track load. `done` may run on any thread.
    pub fn load_tracks(&mut self, done: TrackLoadCallback) {
        self.state = JobState::TracksLoading;
        self.debug(&format!(
            "loading tracks at {}s from {:?}",
            format_secs(self.offset),
            self.file.path()
        ));
        self.reader.load_video_tracks(done);
    }

    /// Continues after the track load: decodes the first sample in range.
    pub fn read_frame(
        &mut self,
        tracks: anyhow::Result<Vec<VideoTrack>>,
        converter: &dyn ImageConverter,
    ) -> ReplayResult<Image> {
        let result = self.read_frame_internal(tracks, converter);
        self.state = JobState::Completed;
        result
    }

    pub fn mark_completed(&mut self) {
        self.state = JobState::Completed;
    }

    fn read_frame_internal(
        &mut self,
        tracks: anyhow::Result<Vec<VideoTrack>>,
        converter: &dyn ImageConverter,
    ) -> ReplayResult<Image> {
        let tracks = tracks
            .map_err(|e| ReplayError::decode(format!("failed to get video track: {:#}", e)))?;
        let track = tracks
            .first()
            .ok_or_else(|| ReplayError::decode("no video track in file"))?;

        self.state = JobState::Reading;
        let mut output = self
            .reader
            .add_output(track, self.format)
            .map_err(|e| ReplayError::decode(format!("track output: {:#}", e)))?;
        if !self.reader.start_reading() {
            return Err(ReplayError::decode("reader did not start"));
        }

        let sample = output
            .copy_next_sample()
            .ok_or_else(|| ReplayError::decode("no sample in range"))?;
        converter
            .convert(&sample)
            .ok_or_else(|| ReplayError::decode("sample could not be converted"))
    }
}

impl ComponentLogger for ExtractionJob {
    fn log_context(&self) -> LogContext {
        LogContext::new("ExtractionJob", &self.owner).with_job(self.id)
    }
}
