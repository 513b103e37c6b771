// src/main.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam::channel::{RecvTimeoutError, Sender, bounded};
use log::{info, warn};

use replay_engine::config::{self, Config};
use replay_engine::decoders::{FfmpegBackend, PassthroughConverter};
use replay_engine::{
    Completion, DataSegment, DecodeContext, Image, ReplayBuffer, ReplayDelegate, ReplayFile,
    ReplayFrameExtractor, ReplayLibrary, ReplayQueue,
};

struct FrameSink {
    tx: Sender<(Image, f64)>,
}

impl ReplayDelegate for FrameSink {
    fn replay_output_frame(
        &self,
        image: Image,
        offset: f64,
        _file: &ReplayFile,
        completion: Option<Completion>,
    ) {
        let _ = self.tx.try_send((image, offset));
        if let Some(completion) = completion {
            completion();
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // ------------------------------------------------------------
    // Config
    // ------------------------------------------------------------
    let cfg_path = std::env::args().nth(1);
    let cfg: Config = match &cfg_path {
        Some(path) => config::load(path).with_context(|| format!("load {}", path))?,
        None => Config::default(),
    };
    info!(
        "[replay] config {}",
        cfg_path.as_deref().unwrap_or("<defaults>")
    );

    // ------------------------------------------------------------
    // Graceful shutdown
    // ------------------------------------------------------------
    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || {
            info!("[replay] shutdown requested");
            r.store(false, Ordering::SeqCst);
        })?;
    }

    // ------------------------------------------------------------
    // Buffer
    // ------------------------------------------------------------
    let queue = ReplayQueue::new("replay-queue")?;
    let buffer = ReplayBuffer::new(queue.clone(), &cfg.buffer);
    let fed = feed_fragments(&buffer, &cfg.driver.source_dir, cfg.driver.segment_duration)?;
    info!("[replay] fed {} fragment(s) from {:?}", fed, cfg.driver.source_dir);

    let Some(file) = buffer.create_file_blocking() else {
        anyhow::bail!("no replay file could be created from {:?}", cfg.driver.source_dir);
    };
    info!("[replay] replay file {:?} ({:.3}s)", file.path(), file.duration());

    if cfg.driver.save {
        let mut library = ReplayLibrary::open(&cfg.library.dir, cfg.buffer.window_secs)?;
        let saved = library.save(&file, 0.0, cfg.buffer.window_secs)?;
        info!("[replay] saved as {} in {:?}", saved.id, library.dir());
    }

    // ------------------------------------------------------------
    // Frame extraction
    // ------------------------------------------------------------
    let ctx = DecodeContext::new(
        queue,
        Arc::new(FfmpegBackend::new(&cfg.backend)),
        Arc::new(PassthroughConverter),
    );
    let (tx, rx) = bounded(1);
    let sink = Arc::new(FrameSink { tx });
    let done = Arc::new(AtomicBool::new(false));
    let completion: Completion = {
        let done = done.clone();
        Box::new(move || done.store(true, Ordering::SeqCst))
    };
    let _extractor = ReplayFrameExtractor::new(
        &ctx,
        &cfg.extractor,
        file,
        cfg.driver.offset,
        &sink,
        Some(completion),
    );

    let deadline = Instant::now() + Duration::from_secs(cfg.driver.wait_secs);
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok((image, offset)) => {
                image.write_ppm(&cfg.driver.output)?;
                info!(
                    "[replay] frame {}x{} at {:.3}s -> {:?} (completion fired: {})",
                    image.width,
                    image.height,
                    offset,
                    cfg.driver.output,
                    done.load(Ordering::SeqCst)
                );
                return Ok(());
            }
            Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => {}
            Err(RecvTimeoutError::Timeout) => {
                anyhow::bail!("no frame within {}s", cfg.driver.wait_secs);
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    warn!("[replay] stopped before a frame arrived");
    Ok(())
}

/// Feeds `init.mp4` and every `*.m4s` (sorted by name) into the buffer.
fn feed_fragments(buffer: &ReplayBuffer, dir: &Path, segment_duration: f64) -> anyhow::Result<usize> {
    let init = std::fs::read(dir.join("init.mp4"))
        .with_context(|| format!("read init segment in {}", dir.display()))?;
    buffer.set_init_segment(init);

    let mut fragments: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("list {}", dir.display()))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "m4s"))
        .collect();
    fragments.sort();

    for (i, path) in fragments.iter().enumerate() {
        let payload = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        buffer.append_data_segment(DataSegment::new(
            i as f64 * segment_duration,
            segment_duration,
            payload,
        ));
    }

    Ok(fragments.len())
}
