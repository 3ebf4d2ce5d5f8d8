//! Canonical frame buffer.
//!
//! Every frame in the pipeline is exactly 640x480 RGB. Sources resize on
//! ingestion, before any other stage runs: detection coordinates, box
//! clamping and overlay rendering all assume this geometry.
//!
//! Frames are owned by whichever stage currently holds them and move
//! between stages; nothing in the pipeline shares a frame concurrently.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};

use crate::{FRAME_HEIGHT, FRAME_WIDTH};

/// A canonical-size RGB frame.
#[derive(Debug)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Wrap a buffer that is already canonical-size.
    pub fn from_canonical(image: RgbImage) -> Result<Self> {
        if image.width() != FRAME_WIDTH || image.height() != FRAME_HEIGHT {
            return Err(anyhow!(
                "frame is {}x{}, expected {}x{}",
                image.width(),
                image.height(),
                FRAME_WIDTH,
                FRAME_HEIGHT
            ));
        }
        Ok(Self { image })
    }

    /// Build a frame from arbitrary decoded input, resizing to canonical
    /// size when needed.
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        if rgb.width() == FRAME_WIDTH && rgb.height() == FRAME_HEIGHT {
            return Self { image: rgb };
        }
        let resized = imageops::resize(&rgb, FRAME_WIDTH, FRAME_HEIGHT, FilterType::Triangle);
        Self { image: resized }
    }

    /// Build a frame from a raw RGB24 buffer of the given dimensions.
    pub fn from_raw_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("raw buffer does not match {}x{}", width, height))?;
        Ok(Self::from_dynamic(&DynamicImage::ImageRgb8(image)))
    }

    /// Solid-fill canonical frame. Used by the renderer's placeholder and
    /// error paths.
    pub fn filled(color: Rgb<u8>) -> Self {
        Self {
            image: RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, color),
        }
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

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Encode for the transport. Each emitted part of the multipart feed
    /// is one of these buffers.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder.encode_image(&self.image)?;
        Ok(buf)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_input_is_resized_to_canonical() {
        let big = DynamicImage::ImageRgb8(RgbImage::new(1280, 720));
        let frame = Frame::from_dynamic(&big);
        assert_eq!(frame.width(), FRAME_WIDTH);
        assert_eq!(frame.height(), FRAME_HEIGHT);
    }

    #[test]
    fn undersized_input_is_resized_to_canonical() {
        let small = DynamicImage::ImageRgb8(RgbImage::new(64, 48));
        let frame = Frame::from_dynamic(&small);
        assert_eq!(frame.width(), FRAME_WIDTH);
        assert_eq!(frame.height(), FRAME_HEIGHT);
    }

    #[test]
    fn canonical_constructor_rejects_wrong_dimensions() {
        assert!(Frame::from_canonical(RgbImage::new(320, 240)).is_err());
        assert!(Frame::from_canonical(RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT)).is_ok());
    }

    #[test]
    fn raw_rgb_buffer_length_is_checked() {
        let ok = vec![0u8; (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize];
        assert!(Frame::from_raw_rgb(ok, FRAME_WIDTH, FRAME_HEIGHT).is_ok());

        let short = vec![0u8; 16];
        assert!(Frame::from_raw_rgb(short, FRAME_WIDTH, FRAME_HEIGHT).is_err());
    }

    #[test]
    fn jpeg_encoding_produces_a_jpeg_stream() -> Result<()> {
        let frame = Frame::filled(Rgb([20, 20, 20]));
        let jpeg = frame.to_jpeg(80)?;
        // SOI marker
        assert_eq!(jpeg[0], 0xFF);
        assert_eq!(jpeg[1], 0xD8);
        Ok(())
    }
}
