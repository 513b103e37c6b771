use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use replay_engine::config::{BufferConfig, ExtractorConfig};
use replay_engine::decoders::PassthroughConverter;
use replay_engine::testing::{MockBackend, RecordingDelegate};
use replay_engine::{
    DataSegment, DecodeContext, ReplayBuffer, ReplayFile, ReplayFrameExtractor, ReplayQueue,
};

const WAIT: Duration = Duration::from_secs(5);

fn context(backend: &MockBackend) -> DecodeContext {
    let queue = ReplayQueue::new("extractor-tests").unwrap();
    DecodeContext::new(
        queue,
        Arc::new(backend.clone()),
        Arc::new(PassthroughConverter),
    )
}

fn replay_file(duration: f64) -> ReplayFile {
    ReplayFile::persistent(PathBuf::from("/nonexistent/replay.mp4"), duration)
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_first_frame_at_offset() {
    let backend = MockBackend::new(30.0);
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let _extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(30.0),
        12.0,
        &delegate,
        None,
    );

    let (offset, image) = delegate.wait_frame(WAIT).unwrap();
    assert_eq!(offset, 12.0);
    assert_eq!((image.width, image.height), (backend.width(), 2));
    // Frame 120 at 10 fps.
    assert!(image.data.iter().all(|&b| b == 120));

    let ranges = backend.opened_ranges();
    assert_eq!(ranges.len(), 1);
    assert_eq!((ranges[0].start, ranges[0].duration), (12.0, 3.0));
}

#[test]
fn test_seeks_coalesce_to_latest() {
    let backend = MockBackend::new(30.0).gated();
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(30.0),
        1.0,
        &delegate,
        None,
    );
    extractor.seek(2.0);
    extractor.seek(3.0);
    ctx.queue.flush();

    // Only the first job is running; 2.0 was overwritten by 3.0.
    assert_eq!(backend.opened_offsets(), vec![1.0]);
    assert!(!extractor.is_idle_blocking());

    backend.release();
    assert_eq!(delegate.wait_frame(WAIT).unwrap().0, 1.0);
    backend.release();
    assert_eq!(delegate.wait_frame(WAIT).unwrap().0, 3.0);

    assert!(wait_until(|| extractor.is_idle_blocking()));
    assert_eq!(backend.opened_offsets(), vec![1.0, 3.0]);
    assert_eq!(delegate.offsets(), vec![1.0, 3.0]);
}

#[test]
fn test_completion_fires_once() {
    let backend = MockBackend::new(30.0);
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(30.0),
        0.0,
        &delegate,
        Some(delegate.counting_completion()),
    );
    delegate.wait_frame(WAIT).unwrap();
    assert_eq!(delegate.completions(), 1);

    extractor.seek(5.0);
    delegate.wait_frame(WAIT).unwrap();
    extractor.seek(6.0);
    delegate.wait_frame(WAIT).unwrap();
    assert_eq!(delegate.completions(), 1);
}

#[test]
fn test_completion_waits_for_a_frame() {
    let backend = MockBackend::new(10.0);
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(10.0),
        20.0,
        &delegate,
        Some(delegate.counting_completion()),
    );
    assert!(delegate.wait_frame(Duration::from_millis(300)).is_none());
    assert!(wait_until(|| extractor.is_idle_blocking()));
    assert_eq!(delegate.completions(), 0);

    // A job without a frame leaves the completion for the next one.
    extractor.seek(4.0);
    assert_eq!(delegate.wait_frame(WAIT).unwrap().0, 4.0);
    assert_eq!(delegate.completions(), 1);
}

#[test]
fn test_offset_past_end_then_valid_seek() {
    let backend = MockBackend::new(10.0);
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(10.0),
        10.0,
        &delegate,
        None,
    );
    assert!(delegate.wait_frame(Duration::from_millis(300)).is_none());
    assert!(wait_until(|| extractor.is_idle_blocking()));

    extractor.seek(5.0);
    assert_eq!(delegate.wait_frame(WAIT).unwrap().0, 5.0);
}

#[test]
fn test_negative_offset_reads_from_start() {
    let backend = MockBackend::new(10.0);
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let _extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(10.0),
        -2.0,
        &delegate,
        None,
    );
    let (offset, image) = delegate.wait_frame(WAIT).unwrap();
    assert_eq!(offset, -2.0);
    assert!(image.data.iter().all(|&b| b == 0));
    assert_eq!(backend.opened_offsets(), vec![0.0]);
}

#[test]
fn test_no_tracks_and_failures_free_the_pipeline() {
    for backend in [
        MockBackend::new(10.0).without_tracks(),
        MockBackend::new(10.0).failing_track_load(),
        MockBackend::new(10.0).failing_open(),
    ] {
        let ctx = context(&backend);
        let delegate = RecordingDelegate::new();
        let extractor = ReplayFrameExtractor::new(
            &ctx,
            &ExtractorConfig::default(),
            replay_file(10.0),
            1.0,
            &delegate,
            None,
        );
        extractor.seek(2.0);

        assert!(wait_until(|| extractor.is_idle_blocking()));
        assert!(delegate.offsets().is_empty());
    }
}

#[test]
fn test_timeout_releases_hung_job() {
    let backend = MockBackend::new(30.0).hanging();
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();
    let config = ExtractorConfig {
        job_timeout_ms: 100,
        ..ExtractorConfig::default()
    };

    let extractor =
        ReplayFrameExtractor::new(&ctx, &config, replay_file(30.0), 1.0, &delegate, None);
    extractor.seek(2.0);
    ctx.queue.flush();
    assert_eq!(backend.opened_offsets(), vec![1.0]);

    // The timed-out job makes room for the pending seek.
    assert!(wait_until(|| backend.opened_offsets().len() == 2));
    assert_eq!(backend.opened_offsets(), vec![1.0, 2.0]);
    assert!(wait_until(|| extractor.is_idle_blocking()));
    assert!(delegate.offsets().is_empty());
}

#[test]
fn test_without_timeout_hung_job_blocks_pending() {
    let backend = MockBackend::new(30.0).hanging();
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();
    let config = ExtractorConfig {
        job_timeout_ms: 0,
        ..ExtractorConfig::default()
    };

    let extractor =
        ReplayFrameExtractor::new(&ctx, &config, replay_file(30.0), 1.0, &delegate, None);
    extractor.seek(2.0);
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(backend.opened_offsets(), vec![1.0]);
    assert!(!extractor.is_idle_blocking());
}

#[test]
fn test_dropped_extractor_ignores_late_tracks() {
    let backend = MockBackend::new(30.0).gated();
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(30.0),
        1.0,
        &delegate,
        Some(delegate.counting_completion()),
    );
    extractor.seek(4.0);
    ctx.queue.flush();
    drop(extractor);

    backend.release();
    backend.release();
    assert!(delegate.wait_frame(Duration::from_millis(300)).is_none());
    ctx.queue.flush();
    assert_eq!(backend.opened_offsets(), vec![1.0]);
    assert_eq!(delegate.completions(), 0);
}

#[test]
fn test_dropped_delegate_still_drains() {
    let backend = MockBackend::new(30.0);
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(30.0),
        1.0,
        &delegate,
        None,
    );
    drop(delegate);
    extractor.seek(2.0);

    assert!(wait_until(|| extractor.is_idle_blocking()));
}

#[test]
fn test_end_to_end_from_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let queue = ReplayQueue::new("end-to-end").unwrap();
    let buffer = ReplayBuffer::new(
        queue.clone(),
        &BufferConfig {
            scratch_dir: Some(dir.path().to_path_buf()),
            ..BufferConfig::default()
        },
    );
    buffer.set_init_segment(&b"INIT"[..]);
    for i in 0..7 {
        buffer.append_data_segment(DataSegment::new(i as f64 * 5.0, 5.0, vec![i as u8; 8]));
    }

    let file = buffer.create_file_blocking().unwrap();
    assert_eq!(file.duration(), 30.0);
    let path = file.path().to_path_buf();

    let backend = MockBackend::new(file.duration());
    let ctx = DecodeContext::new(
        queue.clone(),
        Arc::new(backend.clone()),
        Arc::new(PassthroughConverter),
    );
    let delegate = RecordingDelegate::new();
    let extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        file,
        29.0,
        &delegate,
        None,
    );

    let (offset, _) = delegate.wait_frame(WAIT).unwrap();
    assert_eq!(offset, 29.0);
    assert!(delegate.files()[0].path() == path);
    assert!(extractor.file().is_ephemeral());

    // The file goes away with its last holder.
    assert!(path.exists());
    drop(extractor);
    drop(delegate);
    queue.flush();
    assert!(!path.exists());
}

fn idle_on_queue(extractor: &ReplayFrameExtractor, queue: &ReplayQueue) -> (bool, bool) {
    let (tx, rx) = crossbeam::channel::bounded(1);
    let q = queue.clone();
    extractor.is_idle(move |idle| {
        let _ = tx.send((q.is_current(), idle));
    });
    rx.recv_timeout(WAIT).unwrap()
}

#[test]
fn test_async_is_idle_tracks_running_job() {
    let backend = MockBackend::new(30.0).gated();
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let extractor = ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(30.0),
        1.0,
        &delegate,
        None,
    );
    assert_eq!(idle_on_queue(&extractor, &ctx.queue), (true, false));

    backend.release();
    delegate.wait_frame(WAIT).unwrap();
    assert_eq!(idle_on_queue(&extractor, &ctx.queue), (true, true));
}

#[test]
fn test_blocking_idle_on_queue_is_not_idle() {
    let backend = MockBackend::new(30.0);
    let ctx = context(&backend);
    let delegate = RecordingDelegate::new();

    let extractor = Arc::new(ReplayFrameExtractor::new(
        &ctx,
        &ExtractorConfig::default(),
        replay_file(30.0),
        1.0,
        &delegate,
        None,
    ));
    delegate.wait_frame(WAIT).unwrap();
    assert!(wait_until(|| extractor.is_idle_blocking()));

    // The queue cannot wait on itself, so it never claims idle.
    let on_queue = extractor.clone();
    assert_eq!(ctx.queue.sync(move || on_queue.is_idle_blocking()), Some(false));
}
