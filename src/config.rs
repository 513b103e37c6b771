use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{ReplayError, ReplayResult};
use crate::types::PixelFormat;

pub const DEFAULT_WINDOW_SECS: f64 = 30.0;
pub const DEFAULT_READ_WINDOW_SECS: f64 = 3.0;

// ---------- Buffer ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BufferConfig {
    pub window_secs: f64,
    pub scratch_dir: Option<PathBuf>,
    pub file_extension: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            scratch_dir: None,
            file_extension: "mp4".to_string(),
        }
    }
}

impl BufferConfig {
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

// ---------- Extractor ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ExtractorConfig {
    pub read_window_secs: f64,
    /// 0 disables the track-load timeout.
    pub job_timeout_ms: u64,
    pub pixel_format: PixelFormat,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            read_window_secs: DEFAULT_READ_WINDOW_SECS,
            job_timeout_ms: 10_000,
            pixel_format: PixelFormat::Rgba8,
        }
    }
}

impl ExtractorConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        match self.job_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

// ---------- Playback ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PlaybackConfig {
    pub low_water: usize,
    pub batch: usize,
    pub pixel_format: PixelFormat,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            low_water: 10,
            batch: 11,
            pixel_format: PixelFormat::Rgba8,
        }
    }
}

// ---------- Backend ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

// ---------- Library ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LibraryConfig {
    pub dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("replays"),
        }
    }
}

// ---------- Driver ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DriverConfig {
    pub source_dir: PathBuf,
    pub segment_duration: f64,
    pub offset: f64,
    pub output: PathBuf,
    pub wait_secs: u64,
    /// Also keep a copy of the replay file in the library.
    pub save: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("fragments"),
            segment_duration: 1.0,
            offset: 0.0,
            output: PathBuf::from("frame.ppm"),
            wait_secs: 10,
            save: false,
        }
    }
}

// ---------- Root ----------
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub buffer: BufferConfig,
    pub extractor: ExtractorConfig,
    pub playback: PlaybackConfig,
    pub backend: BackendConfig,
    pub library: LibraryConfig,
    pub driver: DriverConfig,
}

impl Config {
    pub fn validate(&self) -> ReplayResult<()> {
        if !(self.buffer.window_secs > 0.0) {
            return Err(ReplayError::config(format!(
                "buffer.window_secs must be > 0 (got {})",
                self.buffer.window_secs
            )));
        }
        if !(self.extractor.read_window_secs > 0.0) {
            return Err(ReplayError::config(format!(
                "extractor.read_window_secs must be > 0 (got {})",
                self.extractor.read_window_secs
            )));
        }
        if self.playback.batch == 0 {
            return Err(ReplayError::config("playback.batch must be > 0"));
        }
        if self.driver.segment_duration <= 0.0 {
            return Err(ReplayError::config(
                "driver.segment_duration must be > 0",
            ));
        }
        Ok(())
    }
}

// ---------- Loader ----------
pub fn load(path: &str) -> anyhow::Result<Config> {
    let txt = std::fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&txt)?;
    cfg.validate()?;
    Ok(cfg)
}
