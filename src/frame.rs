//! Decoded video frames.
//!
//! A `Frame` is owned by the stream step that read it. It is handed to the
//! detector by reference, rendered into a new annotated image, then dropped.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::SystemTime;

/// One RGB image pulled from a video stream.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Position in the stream, starting at 1 for the first frame.
    pub sequence: u64,
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: SystemTime::now(),
        }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB24 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(2, 2, vec![0u8; 12], 1).is_ok());
        assert!(Frame::from_rgb(2, 2, vec![0u8; 11], 1).is_err());
    }

    #[test]
    fn exposes_dimensions_and_pixels() -> Result<()> {
        let frame = Frame::from_rgb(3, 1, vec![1, 2, 3, 4, 5, 6, 7, 8, 9], 7)?;
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.height(), 1);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.pixels()[3..6], [4, 5, 6]);
        Ok(())
    }
}
