// src/replay/mod.rs
pub mod buffer;
pub mod extractor;
pub mod file;
pub mod job;
pub mod playback;
pub mod queue;
pub mod segment;

pub use buffer::{ReplayBuffer, ReplayBufferStats};
pub use extractor::{Completion, ReplayDelegate, ReplayFrameExtractor};
pub use file::ReplayFile;
pub use job::{DecodeContext, ExtractionJob, JobState};
pub use playback::{PlaybackImage, ReplayPlayback};
pub use queue::ReplayQueue;
pub use segment::{DataSegment, SegmentWindow};
