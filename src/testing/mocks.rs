use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, unbounded};

use crate::core::lock_mutex;
use crate::decoders::{AssetReader, MediaBackend, TrackLoadCallback, TrackOutput};
use crate::replay::{Completion, ReplayDelegate, ReplayFile};
use crate::types::{Image, PixelFormat, Sample, TimeRange, VideoTrack};

#[derive(Clone, Copy, PartialEq, Eq)]
enum TrackLoad {
    Immediate,
    Gated,
    Never,
    Fail,
}

struct MockInner {
    media_duration: f64,
    frame_rate: f64,
    width: u32,
    height: u32,
    has_tracks: bool,
    fail_open: bool,
    track_load: TrackLoad,
    opened: Mutex<Vec<TimeRange>>,
    permits_tx: Sender<()>,
    permits_rx: Receiver<()>,
}

/// Scripted decoder: one video track of `media_duration` seconds at a fixed
/// frame rate. Each pixel byte of a frame is its frame index (mod 256).
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<MockInner>,
}

impl MockBackend {
    pub fn new(media_duration: f64) -> Self {
        let (permits_tx, permits_rx) = unbounded();
        Self {
            inner: Arc::new(MockInner {
                media_duration,
                frame_rate: 10.0,
                width: 4,
                height: 2,
                has_tracks: true,
                fail_open: false,
                track_load: TrackLoad::Immediate,
                opened: Mutex::new(Vec::new()),
                permits_tx,
                permits_rx,
            }),
        }
    }

    fn configure(self, f: impl FnOnce(&mut MockInner)) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(_) => panic!("configure MockBackend before cloning it"),
        };
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn without_tracks(self) -> Self {
        self.configure(|inner| inner.has_tracks = false)
    }

    pub fn failing_open(self) -> Self {
        self.configure(|inner| inner.fail_open = true)
    }

    pub fn failing_track_load(self) -> Self {
        self.configure(|inner| inner.track_load = TrackLoad::Fail)
    }

    /// Track loads block until `release` is called once per load.
    pub fn gated(self) -> Self {
        self.configure(|inner| inner.track_load = TrackLoad::Gated)
    }

    /// Track loads never answer.
    pub fn hanging(self) -> Self {
        self.configure(|inner| inner.track_load = TrackLoad::Never)
    }

    pub fn release(&self) {
        let _ = self.inner.permits_tx.send(());
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn opened_ranges(&self) -> Vec<TimeRange> {
        lock_mutex(&self.inner.opened, "MockBackend::opened_ranges").clone()
    }

    pub fn opened_offsets(&self) -> Vec<f64> {
        self.opened_ranges().iter().map(|r| r.start).collect()
    }
}

impl MediaBackend for MockBackend {
    fn open_reader(&self, _path: &Path, range: TimeRange) -> Result<Box<dyn AssetReader>> {
        if self.inner.fail_open {
            anyhow::bail!("mock open failure");
        }
        lock_mutex(&self.inner.opened, "MockBackend::open_reader").push(range);
        Ok(Box::new(MockReader {
            inner: self.inner.clone(),
            range,
            started: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MockReader {
    inner: Arc<MockInner>,
    range: TimeRange,
    started: Arc<AtomicBool>,
}

impl AssetReader for MockReader {
    fn load_video_tracks(&mut self, done: TrackLoadCallback) {
        let inner = self.inner.clone();
        let tracks = if inner.has_tracks {
            vec![VideoTrack {
                index: 0,
                width: inner.width,
                height: inner.height,
                codec: Some("mock".to_string()),
            }]
        } else {
            Vec::new()
        };

        match inner.track_load {
            TrackLoad::Never => drop(done),
            TrackLoad::Fail => {
                std::thread::spawn(move || done(Err(anyhow::anyhow!("mock track load failure"))));
            }
            TrackLoad::Immediate => {
                std::thread::spawn(move || done(Ok(tracks)));
            }
            TrackLoad::Gated => {
                let permits = inner.permits_rx.clone();
                std::thread::spawn(move || {
                    if permits.recv_timeout(Duration::from_secs(10)).is_ok() {
                        done(Ok(tracks));
                    }
                });
            }
        }
    }

    fn add_output(&mut self, track: &VideoTrack, format: PixelFormat) -> Result<Box<dyn TrackOutput>> {
        let first_index = (self.range.start * self.inner.frame_rate - 1e-9).ceil().max(0.0) as u64;
        Ok(Box::new(MockOutput {
            inner: self.inner.clone(),
            range: self.range,
            width: track.width,
            height: track.height,
            format,
            next_index: first_index,
            started: self.started.clone(),
        }))
    }

    fn start_reading(&mut self) -> bool {
        self.started.store(true, Ordering::SeqCst);
        true
    }
}

struct MockOutput {
    inner: Arc<MockInner>,
    range: TimeRange,
    width: u32,
    height: u32,
    format: PixelFormat,
    next_index: u64,
    started: Arc<AtomicBool>,
}

impl TrackOutput for MockOutput {
    fn copy_next_sample(&mut self) -> Option<Sample> {
        if !self.started.load(Ordering::SeqCst) {
            return None;
        }
        let t = self.next_index as f64 / self.inner.frame_rate;
        if t >= self.range.end() || t >= self.inner.media_duration {
            return None;
        }
        let value = (self.next_index % 256) as u8;
        self.next_index += 1;

        Some(Sample {
            presentation_time: t,
            width: self.width,
            height: self.height,
            format: self.format,
            data: Bytes::from(vec![value; self.format.frame_len(self.width, self.height)]),
        })
    }
}

/// Delegate that records every frame and runs the completion it is given.
pub struct RecordingDelegate {
    frames_tx: Sender<(f64, Image)>,
    frames_rx: Receiver<(f64, Image)>,
    received: Mutex<Vec<(f64, ReplayFile)>>,
    completions: Arc<AtomicU64>,
}

impl RecordingDelegate {
    pub fn new() -> Arc<Self> {
        let (frames_tx, frames_rx) = unbounded();
        Arc::new(Self {
            frames_tx,
            frames_rx,
            received: Mutex::new(Vec::new()),
            completions: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn wait_frame(&self, timeout: Duration) -> Option<(f64, Image)> {
        self.frames_rx.recv_timeout(timeout).ok()
    }

    pub fn offsets(&self) -> Vec<f64> {
        lock_mutex(&self.received, "RecordingDelegate")
            .iter()
            .map(|(offset, _)| *offset)
            .collect()
    }

    pub fn files(&self) -> Vec<ReplayFile> {
        lock_mutex(&self.received, "RecordingDelegate")
            .iter()
            .map(|(_, file)| file.clone())
            .collect()
    }

    /// Counter bumped by the completion `counting_completion` builds.
    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn counting_completion(&self) -> Completion {
        let completions = self.completions.clone();
        Box::new(move || {
            completions.fetch_add(1, Ordering::SeqCst);
        })
    }
}

impl ReplayDelegate for RecordingDelegate {
    fn replay_output_frame(
        &self,
        image: Image,
        offset: f64,
        file: &ReplayFile,
        completion: Option<Completion>,
    ) {
        lock_mutex(&self.received, "RecordingDelegate::replay_output_frame")
            .push((offset, file.clone()));
        if let Some(completion) = completion {
            completion();
        }
        let _ = self.frames_tx.send((offset, image));
    }
}
