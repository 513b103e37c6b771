// src/replay/extractor.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::config::ExtractorConfig;
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::{ReplayError, ReplayResult, format_secs, lock_mutex};
use crate::types::{Image, PixelFormat, VideoTrack};

use super::file::ReplayFile;
use super::job::{DecodeContext, ExtractionJob};

static NEXT_EXTRACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// One-shot callback handed to the delegate with the first frame.
pub type Completion = Box<dyn FnOnce() + Send>;

/// Receives decoded replay frames on the replay queue.
pub trait ReplayDelegate: Send + Sync {
    /// Called once per successful job. If `completion` is present the
    /// delegate is expected to invoke it.
    fn replay_output_frame(
        &self,
        image: Image,
        offset: f64,
        file: &ReplayFile,
        completion: Option<Completion>,
    );
}

#[derive(Default)]
struct ExtractorState {
    job: Option<ExtractionJob>,
    pending_offset: Option<f64>,
    completion: Option<Completion>,
    next_job_id: u64,
}

struct ExtractorShared {
    id: u64,
    ctx: DecodeContext,
    file: ReplayFile,
    delegate: Weak<dyn ReplayDelegate>,
    read_window: f64,
    job_timeout: Option<Duration>,
    format: PixelFormat,
    state: Mutex<ExtractorState>,
}

/// Extracts single frames from one replay file.
///
/// At most one job runs at a time. Seeks issued while a job runs overwrite a
/// single pending offset, so only the latest one is decoded once the running
/// job finishes. Dropping the extractor turns queued work into no-ops.
pub struct ReplayFrameExtractor {
    shared: Arc<ExtractorShared>,
}

impl ReplayFrameExtractor {
    pub fn new<D>(
        ctx: &DecodeContext,
        config: &ExtractorConfig,
        file: ReplayFile,
        offset: f64,
        delegate: &Arc<D>,
        completion: Option<Completion>,
    ) -> Self
    where
        D: ReplayDelegate + 'static,
    {
        let delegate: Weak<dyn ReplayDelegate> = Arc::downgrade(delegate) as Weak<dyn ReplayDelegate>;
        let extractor = Self {
            shared: Arc::new(ExtractorShared {
                id: NEXT_EXTRACTOR_ID.fetch_add(1, Ordering::Relaxed),
                ctx: ctx.clone(),
                file,
                delegate,
                read_window: config.read_window_secs,
                job_timeout: config.job_timeout(),
                format: config.pixel_format,
                state: Mutex::new(ExtractorState {
                    completion,
                    ..ExtractorState::default()
                }),
            }),
        };
        extractor.shared.debug(&format!(
            "created for {:?} ({}s)",
            extractor.shared.file.path(),
            format_secs(extractor.shared.file.duration())
        ));
        extractor.seek(offset);
        extractor
    }

    pub fn file(&self) -> &ReplayFile {
        &self.shared.file
    }

    pub fn seek(&self, offset: f64) {
        let weak = Arc::downgrade(&self.shared);
        self.shared.ctx.queue.post(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            lock_mutex(&shared.state, "ReplayFrameExtractor::seek").pending_offset = Some(offset);
            shared.try_next_job();
        });
    }

    /// Reports whether no job is running and no offset is pending.
    pub fn is_idle<F>(&self, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        self.shared.ctx.queue.post(move || {
            let idle = weak.upgrade().is_none_or(|shared| shared.is_idle());
            completion(idle);
        });
    }

    /// `is_idle` for callers off the queue. On the queue thread it cannot
    /// wait, logs an error and reports `false`.
    pub fn is_idle_blocking(&self) -> bool {
        if self.shared.ctx.queue.is_current() {
            self.shared.error("is_idle_blocking called on the replay queue");
            return false;
        }
        let shared = self.shared.clone();
        self.shared
            .ctx
            .queue
            .sync(move || shared.is_idle())
            .unwrap_or(true)
    }
}

impl ExtractorShared {
    fn is_idle(&self) -> bool {
        let state = lock_mutex(&self.state, "ReplayFrameExtractor::is_idle");
        state.job.is_none() && state.pending_offset.is_none()
    }

    /// Promotes the pending offset to a job if none is running.
    fn try_next_job(self: &Arc<Self>) {
        loop {
            let mut state = lock_mutex(&self.state, "ReplayFrameExtractor::try_next_job");
            if state.job.is_some() {
                return;
            }
            let Some(offset) = state.pending_offset.take() else {
                return;
            };
            state.next_job_id += 1;
            let job_id = state.next_job_id;

            let job = ExtractionJob::new(
                job_id,
                &self.id.to_string(),
                self.file.clone(),
                offset,
                self.read_window,
                self.format,
                self.ctx.backend.as_ref(),
            );

            match job {
                Ok(job) => {
                    let job = state.job.insert(job);
                    job.load_tracks(self.track_load_callback(job_id));
                    drop(state);

                    if let Some(timeout) = self.job_timeout {
                        let weak = Arc::downgrade(self);
                        self.ctx.queue.post_after(timeout, move || {
                            if let Some(shared) = weak.upgrade() {
                                shared.on_job_timeout(job_id);
                            }
                        });
                    }
                    return;
                }
                Err(e) => {
                    drop(state);
                    // Completed without a frame; try whatever is pending now.
                    self.debug(&format!("job {} at {}s: {}", job_id, format_secs(offset), e));
                }
            }
        }
    }

    fn track_load_callback(self: &Arc<Self>, job_id: u64) -> crate::decoders::TrackLoadCallback {
        let weak = Arc::downgrade(self);
        let queue = self.ctx.queue.clone();
        Box::new(move |tracks| {
            queue.post(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_tracks_loaded(job_id, tracks);
                }
            });
        })
    }

    fn on_tracks_loaded(self: &Arc<Self>, job_id: u64, tracks: anyhow::Result<Vec<VideoTrack>>) {
        let outcome = {
            let mut state = lock_mutex(&self.state, "ReplayFrameExtractor::on_tracks_loaded");
            match state.job.as_mut() {
                Some(job) if job.id() == job_id => {
                    let image = job.read_frame(tracks, self.ctx.converter.as_ref());
                    Some((job.offset(), image))
                }
                _ => None,
            }
        };

        match outcome {
            Some((offset, image)) => self.job_completed(job_id, offset, image),
            None => self.debug(&format!("ignoring late track load for job {}", job_id)),
        }
    }

    fn on_job_timeout(self: &Arc<Self>, job_id: u64) {
        let offset = {
            let mut state = lock_mutex(&self.state, "ReplayFrameExtractor::on_job_timeout");
            match state.job.as_mut() {
                Some(job) if job.id() == job_id => {
                    job.mark_completed();
                    Some(job.offset())
                }
                _ => None,
            }
        };

        if let Some(offset) = offset {
            self.warn(&format!(
                "job {} at {}s timed out loading tracks",
                job_id,
                format_secs(offset)
            ));
            self.job_completed(job_id, offset, Err(ReplayError::decode("track load timed out")));
        }
    }

    fn job_completed(self: &Arc<Self>, job_id: u64, offset: f64, image: ReplayResult<Image>) {
        let completion = {
            let mut state = lock_mutex(&self.state, "ReplayFrameExtractor::job_completed");
            state.job = None;
            if image.is_ok() { state.completion.take() } else { None }
        };

        match image {
            Ok(image) => match self.delegate.upgrade() {
                Some(delegate) => {
                    self.debug(&format!("job {} delivered frame at {}s", job_id, format_secs(offset)));
                    delegate.replay_output_frame(image, offset, &self.file, completion);
                }
                None => self.debug("delegate gone, frame dropped"),
            },
            Err(e) => self.info(&format!("job {} at {}s: {}", job_id, format_secs(offset), e)),
        }

        self.try_next_job();
    }
}

impl ComponentLogger for ExtractorShared {
    fn log_context(&self) -> LogContext {
        LogContext::new("ReplayFrameExtractor", &self.id.to_string())
    }
}
