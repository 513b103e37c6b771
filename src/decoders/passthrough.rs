use crate::decoders::ImageConverter;
use crate::types::{Image, Sample};

/// For backends whose samples already hold packed display pixels.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughConverter;

impl ImageConverter for PassthroughConverter {
    fn convert(&self, sample: &Sample) -> Option<Image> {
        let expected = sample.format.frame_len(sample.width, sample.height);
        if expected == 0 || sample.data.len() != expected {
            log::debug!(
                "[passthrough] sample {}x{} has {} bytes, expected {}",
                sample.width,
                sample.height,
                sample.data.len(),
                expected
            );
            return None;
        }

        Some(Image {
            width: sample.width,
            height: sample.height,
            format: sample.format,
            data: sample.data.clone(),
        })
    }
}
