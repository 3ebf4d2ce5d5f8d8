//! Still image frame source.
//!
//! Decodes a single uploaded image at open time. The first `read` hands
//! over the decoded frame, the second signals end-of-stream. A decode
//! failure is a recognizable `ImageDecodeError`; substituting the visible
//! error frame is the stream controller's job, not this module's.

use anyhow::{anyhow, Result};
use image::ImageError;

use super::{FrameSource, SourceKind};
use crate::frame::Frame;
use crate::ImageDecodeError;

#[derive(Debug)]
pub struct StillImageSource {
    frame: Option<Frame>,
}

impl StillImageSource {
    pub fn open(path: &str) -> Result<Self> {
        let decoded = image::open(path).map_err(|e| match e {
            ImageError::IoError(io) => anyhow!("cannot read {}: {}", path, io),
            other => anyhow::Error::new(ImageDecodeError {
                message: format!("{}: {}", path, other),
            }),
        })?;
        log::info!("StillImageSource: decoded {}", path);
        Ok(Self {
            frame: Some(Frame::from_dynamic(&decoded)),
        })
    }
}

impl FrameSource for StillImageSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Image
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        Ok(self.frame.take())
    }

    fn close(&mut self) {
        self.frame = None;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Write;

    fn write_test_png(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        let img = RgbImage::from_pixel(32, 32, Rgb([120, 40, 200]));
        img.save(&path).expect("save test png");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn serves_the_decoded_frame_exactly_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_test_png(&dir, "upload.png");

        let mut source = StillImageSource::open(&path)?;
        let frame = source.read()?.expect("decoded frame");
        assert_eq!(frame.width(), crate::FRAME_WIDTH);
        assert_eq!(frame.height(), crate::FRAME_HEIGHT);

        assert!(source.read()?.is_none());
        Ok(())
    }

    #[test]
    fn garbage_bytes_fail_with_image_decode_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.png");
        let mut file = std::fs::File::create(&path)?;
        file.write_all(b"not an image at all")?;

        let err = StillImageSource::open(&path.to_string_lossy()).unwrap_err();
        assert!(
            err.downcast_ref::<ImageDecodeError>().is_some(),
            "expected ImageDecodeError, got: {err:#}"
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_not_a_decode_error() {
        let err = StillImageSource::open("/nonexistent/upload.png").unwrap_err();
        assert!(err.downcast_ref::<ImageDecodeError>().is_none());
    }
}
