use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Name understood by ffmpeg's `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgba8 => "rgba",
            PixelFormat::Bgra8 => "bgra",
        }
    }

    pub fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// Half-open range `[start, start + duration)` in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub duration: f64,
}

impl TimeRange {
    pub fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoTrack {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub codec: Option<String>,
}

/// Raw decoded video sample as handed out by a track output.
#[derive(Clone, Debug)]
pub struct Sample {
    pub presentation_time: f64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

/// Displayable bitmap.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl Image {
    /// Writes a binary PPM (P6). Alpha is dropped.
    pub fn write_ppm(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;

        for px in self.data.chunks_exact(self.format.bytes_per_pixel()) {
            let rgb = match self.format {
                PixelFormat::Rgba8 => [px[0], px[1], px[2]],
                PixelFormat::Bgra8 => [px[2], px[1], px[0]],
            };
            out.write_all(&rgb)?;
        }

        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(4.0, 3.0);
        assert_eq!(range.end(), 7.0);
    }

    #[test]
    fn test_write_ppm_swaps_bgra() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.ppm");
        let image = Image {
            width: 1,
            height: 1,
            format: PixelFormat::Bgra8,
            data: Bytes::from_static(&[10, 20, 30, 255]),
        };

        image.write_ppm(&path).unwrap();

        let written = std::fs::read(&path).unwrap();
        assert!(written.starts_with(b"P6\n1 1\n255\n"));
        assert_eq!(&written[written.len() - 3..], &[30, 20, 10]);
    }
}
