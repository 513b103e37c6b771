// src/replay/playback.rs
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::PlaybackConfig;
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::{format_secs, lock_mutex};
use crate::decoders::{AssetReader, TrackOutput};
use crate::types::{Image, PixelFormat, TimeRange, VideoTrack};

use super::file::ReplayFile;
use super::job::DecodeContext;

static NEXT_PLAYBACK_ID: AtomicU64 = AtomicU64::new(1);

/// A decoded playback frame, or the end marker.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackImage {
    pub image: Option<Image>,
    /// Seconds since the playback start.
    pub offset: Option<f64>,
    pub is_last: bool,
}

impl PlaybackImage {
    fn frame(image: Image, offset: f64) -> Self {
        Self {
            image: Some(image),
            offset: Some(offset),
            is_last: false,
        }
    }

    fn last() -> Self {
        Self {
            image: None,
            offset: None,
            is_last: true,
        }
    }

    fn pending() -> Self {
        Self {
            image: None,
            offset: None,
            is_last: false,
        }
    }
}

#[derive(Default)]
struct PlaybackState {
    reader: Option<Box<dyn AssetReader>>,
    output: Option<Box<dyn TrackOutput>>,
    images: VecDeque<PlaybackImage>,
    completed: bool,
    fill_scheduled: bool,
}

struct PlaybackShared {
    id: u64,
    ctx: DecodeContext,
    file: ReplayFile,
    range: TimeRange,
    low_water: usize,
    batch: usize,
    format: PixelFormat,
    state: Mutex<PlaybackState>,
}

/// Plays a time range of a replay file by decoding ahead of the playhead.
///
/// Decoding happens on the replay queue; `frame_at` may be called from any
/// thread and only touches the buffered frames.
pub struct ReplayPlayback {
    shared: Arc<PlaybackShared>,
}

impl ReplayPlayback {
    pub fn new(
        ctx: &DecodeContext,
        config: &PlaybackConfig,
        file: ReplayFile,
        start: f64,
        duration: f64,
    ) -> Self {
        let shared = Arc::new(PlaybackShared {
            id: NEXT_PLAYBACK_ID.fetch_add(1, Ordering::Relaxed),
            ctx: ctx.clone(),
            file,
            range: TimeRange::new(start.max(0.0), duration),
            low_water: config.low_water,
            batch: config.batch.max(1),
            format: config.pixel_format,
            state: Mutex::new(PlaybackState::default()),
        });

        let weak = Arc::downgrade(&shared);
        shared.ctx.queue.post(move || {
            if let Some(shared) = weak.upgrade() {
                shared.open();
            }
        });

        Self { shared }
    }

    /// First buffered frame later than `offset`, the end marker, or an empty
    /// result while decoding has not caught up.
    pub fn frame_at(&self, offset: f64) -> PlaybackImage {
        let mut state = lock_mutex(&self.shared.state, "ReplayPlayback::frame_at");
        let image = find_image(&mut state.images, offset);

        let refill = state.images.len() < self.shared.low_water
            && !state.completed
            && !state.fill_scheduled
            && state.output.is_some();
        if refill {
            state.fill_scheduled = true;
        }
        drop(state);

        if refill {
            let weak = Arc::downgrade(&self.shared);
            self.shared.ctx.queue.post(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.fill();
                }
            });
        }
        image
    }

    pub fn buffered(&self) -> usize {
        lock_mutex(&self.shared.state, "ReplayPlayback::buffered")
            .images
            .len()
    }

    pub fn is_completed(&self) -> bool {
        lock_mutex(&self.shared.state, "ReplayPlayback::is_completed").completed
    }
}

fn find_image(images: &mut VecDeque<PlaybackImage>, offset: f64) -> PlaybackImage {
    while let Some(image) = images.front() {
        match image.offset {
            Some(image_offset) if offset < image_offset => return image.clone(),
            Some(_) => {}
            None => return image.clone(),
        }
        images.pop_front();
    }
    PlaybackImage::pending()
}

impl PlaybackShared {
    fn open(self: &Arc<Self>) {
        let mut reader = match self.ctx.backend.open_reader(self.file.path(), self.range) {
            Ok(reader) => reader,
            Err(e) => {
                self.warn(&format!("open {:?}: {:#}", self.file.path(), e));
                self.mark_completed();
                return;
            }
        };

        let weak = Arc::downgrade(self);
        let queue = self.ctx.queue.clone();
        reader.load_video_tracks(Box::new(move |tracks| {
            queue.post(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_tracks_loaded(tracks);
                }
            });
        }));
        lock_mutex(&self.state, "ReplayPlayback::open").reader = Some(reader);

        self.debug(&format!(
            "opened {:?} at {}s for {}s",
            self.file.path(),
            format_secs(self.range.start),
            format_secs(self.range.duration)
        ));
    }

    fn on_tracks_loaded(self: &Arc<Self>, tracks: anyhow::Result<Vec<VideoTrack>>) {
        let track = match tracks {
            Ok(tracks) => tracks.into_iter().next(),
            Err(e) => {
                self.info(&format!("failed to get video track: {:#}", e));
                None
            }
        };
        let Some(track) = track else {
            self.mark_completed();
            return;
        };

        let started = {
            let mut state = lock_mutex(&self.state, "ReplayPlayback::on_tracks_loaded");
            let output = match state.reader.as_mut() {
                Some(reader) => reader.add_output(&track, self.format),
                None => return,
            };
            match output {
                Ok(output) => {
                    state.output = Some(output);
                    state.reader.as_mut().is_some_and(|r| r.start_reading())
                }
                Err(e) => {
                    drop(state);
                    self.info(&format!("track output: {:#}", e));
                    false
                }
            }
        };

        if started {
            lock_mutex(&self.state, "ReplayPlayback::on_tracks_loaded").fill_scheduled = true;
            self.fill();
        } else {
            self.mark_completed();
        }
    }

    fn fill(&self) {
        let output = lock_mutex(&self.state, "ReplayPlayback::fill").output.take();
        let Some(mut output) = output else {
            lock_mutex(&self.state, "ReplayPlayback::fill").fill_scheduled = false;
            return;
        };

        let mut decoded = Vec::with_capacity(self.batch);
        let mut exhausted = false;
        while decoded.len() < self.batch {
            let Some(sample) = output.copy_next_sample() else {
                exhausted = true;
                break;
            };
            match self.ctx.converter.convert(&sample) {
                Some(image) => decoded.push(PlaybackImage::frame(
                    image,
                    sample.presentation_time - self.range.start,
                )),
                None => self.debug("skipping unconvertible sample"),
            }
        }

        let mut state = lock_mutex(&self.state, "ReplayPlayback::fill");
        state.images.extend(decoded);
        state.fill_scheduled = false;
        if exhausted {
            state.images.push_back(PlaybackImage::last());
            state.completed = true;
            state.reader = None;
        } else {
            state.output = Some(output);
        }
    }

    fn mark_completed(&self) {
        let mut state = lock_mutex(&self.state, "ReplayPlayback::mark_completed");
        if !state.completed {
            state.images.push_back(PlaybackImage::last());
            state.completed = true;
        }
        state.reader = None;
        state.output = None;
    }
}

impl ComponentLogger for PlaybackShared {
    fn log_context(&self) -> LogContext {
        LogContext::new("ReplayPlayback", &self.id.to_string())
    }
}
