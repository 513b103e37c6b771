// src/decoders/ffmpeg.rs
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use bytes::Bytes;
use serde::Deserialize;

use crate::config::BackendConfig;
use crate::core::lock_mutex;
use crate::decoders::{AssetReader, MediaBackend, TrackLoadCallback, TrackOutput};
use crate::types::{PixelFormat, Sample, TimeRange, VideoTrack};

const FALLBACK_FRAME_RATE: f64 = 30.0;

/// Decodes through external `ffprobe`/`ffmpeg` processes.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
        }
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_reader(&self, path: &Path, range: TimeRange) -> anyhow::Result<Box<dyn AssetReader>> {
        std::fs::metadata(path).with_context(|| format!("open {}", path.display()))?;
        Ok(Box::new(FfmpegReader {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            path: path.to_path_buf(),
            range,
            frame_rates: Arc::new(Mutex::new(HashMap::new())),
            outputs: Vec::new(),
        }))
    }
}

struct PendingOutput {
    track_index: usize,
    format: PixelFormat,
    process: Arc<Mutex<Option<DecodeProcess>>>,
}

struct FfmpegReader {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    path: PathBuf,
    range: TimeRange,
    frame_rates: Arc<Mutex<HashMap<usize, f64>>>,
    outputs: Vec<PendingOutput>,
}

impl AssetReader for FfmpegReader {
    fn load_video_tracks(&mut self, done: TrackLoadCallback) {
        let ffprobe = self.ffprobe.clone();
        let path = self.path.clone();
        let frame_rates = self.frame_rates.clone();
        let done = Arc::new(Mutex::new(Some(done)));
        let done_in_thread = done.clone();

        let spawned = std::thread::Builder::new()
            .name("ffprobe".to_string())
            .spawn(move || {
                let result: anyhow::Result<Vec<VideoTrack>> =
                    probe_video_tracks(&ffprobe, &path).map(|probed| {
                        let mut rates = lock_mutex(&frame_rates, "FfmpegReader::frame_rates");
                        probed
                            .into_iter()
                            .map(|(track, rate)| {
                                rates.insert(track.index, rate);
                                track
                            })
                            .collect()
                    });
                if let Some(done) = lock_mutex(&done_in_thread, "FfmpegReader::probe").take() {
                    done(result);
                }
            });

        if let Err(e) = spawned {
            if let Some(done) = lock_mutex(&done, "FfmpegReader::probe").take() {
                done(Err(anyhow!("spawn probe thread: {}", e)));
            }
        }
    }

    fn add_output(
        &mut self,
        track: &VideoTrack,
        format: PixelFormat,
    ) -> anyhow::Result<Box<dyn TrackOutput>> {
        if track.width == 0 || track.height == 0 {
            anyhow::bail!("track {} has no frame size", track.index);
        }
        let frame_rate = lock_mutex(&self.frame_rates, "FfmpegReader::add_output")
            .get(&track.index)
            .copied()
            .unwrap_or(FALLBACK_FRAME_RATE);

        let process = Arc::new(Mutex::new(None));
        self.outputs.push(PendingOutput {
            track_index: track.index,
            format,
            process: process.clone(),
        });

        Ok(Box::new(FfmpegTrackOutput {
            process,
            width: track.width,
            height: track.height,
            format,
            frame_rate,
            start: self.range.start,
            frames_read: 0,
        }))
    }

    fn start_reading(&mut self) -> bool {
        if self.outputs.is_empty() {
            return false;
        }

        for output in &self.outputs {
            match spawn_decoder(&self.ffmpeg, &self.path, self.range, output) {
                Ok(process) => {
                    *lock_mutex(&output.process, "FfmpegReader::start_reading") = Some(process);
                }
                Err(e) => {
                    log::warn!("[ffmpeg] failed to start decoder for {:?}: {:#}", self.path, e);
                    return false;
                }
            }
        }
        true
    }
}

struct DecodeProcess {
    child: Child,
    stdout: ChildStdout,
}

impl Drop for DecodeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_decoder(
    ffmpeg: &Path,
    path: &Path,
    range: TimeRange,
    output: &PendingOutput,
) -> anyhow::Result<DecodeProcess> {
    let mut child = Command::new(ffmpeg)
        .args(decoder_args(path, range, output.track_index, output.format))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn {}", ffmpeg.display()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("ffmpeg stdout not captured"))?;
    Ok(DecodeProcess { child, stdout })
}

/// Raw frames must keep the probed `width x height`, so rotation metadata is
/// not applied.
fn decoder_args(
    path: &Path,
    range: TimeRange,
    track_index: usize,
    format: PixelFormat,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-nostdin", "-v", "error", "-noautorotate"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push("-ss".into());
    args.push(format!("{:.3}", range.start).into());
    args.push("-t".into());
    args.push(format!("{:.3}", range.duration).into());
    args.push("-i".into());
    args.push(path.as_os_str().to_os_string());
    args.push("-map".into());
    args.push(format!("0:v:{}", track_index).into());
    for arg in ["-f", "rawvideo", "-pix_fmt", format.ffmpeg_name(), "pipe:1"] {
        args.push(arg.into());
    }
    args
}

struct FfmpegTrackOutput {
    process: Arc<Mutex<Option<DecodeProcess>>>,
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_rate: f64,
    start: f64,
    frames_read: u64,
}

impl TrackOutput for FfmpegTrackOutput {
    fn copy_next_sample(&mut self) -> Option<Sample> {
        let mut guard = lock_mutex(&self.process, "FfmpegTrackOutput::copy_next_sample");
        let process = guard.as_mut()?;

        let mut frame = vec![0u8; self.format.frame_len(self.width, self.height)];
        if let Err(e) = process.stdout.read_exact(&mut frame) {
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                log::debug!("[ffmpeg] read failed: {}", e);
            }
            // Drop the process; the range is exhausted.
            *guard = None;
            return None;
        }

        let presentation_time = self.start + self.frames_read as f64 / self.frame_rate;
        self.frames_read += 1;

        Some(Sample {
            presentation_time,
            width: self.width,
            height: self.height,
            format: self.format,
            data: Bytes::from(frame),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

fn probe_video_tracks(ffprobe: &Path, path: &Path) -> anyhow::Result<Vec<(VideoTrack, f64)>> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-select_streams", "v"])
        .args([
            "-show_entries",
            "stream=codec_name,width,height,avg_frame_rate,r_frame_rate",
        ])
        .args(["-of", "json"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("spawn {}", ffprobe.display()))?;

    if !output.status.success() {
        anyhow::bail!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    parse_probe_output(&output.stdout)
}

/// Video streams in `-select_streams v` order, so `index` maps to `0:v:index`.
fn parse_probe_output(json: &[u8]) -> anyhow::Result<Vec<(VideoTrack, f64)>> {
    let probe: ProbeOutput = serde_json::from_slice(json).context("parse ffprobe output")?;

    Ok(probe
        .streams
        .into_iter()
        .enumerate()
        .map(|(index, stream)| {
            let rate = stream
                .avg_frame_rate
                .as_deref()
                .and_then(parse_rate)
                .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
                .unwrap_or(FALLBACK_FRAME_RATE);
            let track = VideoTrack {
                index,
                width: stream.width.unwrap_or(0),
                height: stream.height.unwrap_or(0),
                codec: stream.codec_name,
            };
            (track, rate)
        })
        .collect())
}

/// Parses ffprobe rationals like `30000/1001`. `0/0` yields `None`.
fn parse_rate(text: &str) -> Option<f64> {
    let (num, den) = match text.split_once('/') {
        Some((n, d)) => (n.trim().parse::<f64>().ok()?, d.trim().parse::<f64>().ok()?),
        None => (text.trim().parse::<f64>().ok()?, 1.0),
    };
    if num > 0.0 && den > 0.0 {
        Some(num / den)
    } else {
        None
    }
}
