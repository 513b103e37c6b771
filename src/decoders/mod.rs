use std::path::Path;

use crate::types::{Image, PixelFormat, Sample, TimeRange, VideoTrack};

pub mod ffmpeg;
pub mod passthrough;

pub use ffmpeg::FfmpegBackend;
pub use passthrough::PassthroughConverter;

/// Receives the result of an asynchronous track load. May be called on any
/// thread.
pub type TrackLoadCallback = Box<dyn FnOnce(anyhow::Result<Vec<VideoTrack>>) + Send>;

/// Opens readers over a time range of a media file.
pub trait MediaBackend: Send + Sync {
    fn open_reader(&self, path: &Path, range: TimeRange) -> anyhow::Result<Box<dyn AssetReader>>;
}

pub trait AssetReader: Send {
    fn load_video_tracks(&mut self, done: TrackLoadCallback);
    fn add_output(
        &mut self,
        track: &VideoTrack,
        format: PixelFormat,
    ) -> anyhow::Result<Box<dyn TrackOutput>>;
    fn start_reading(&mut self) -> bool;
}

pub trait TrackOutput: Send {
    /// Next decoded sample inside the reader's time range.
    fn copy_next_sample(&mut self) -> Option<Sample>;
}

pub trait ImageConverter: Send + Sync {
    fn convert(&self, sample: &Sample) -> Option<Image>;
}
