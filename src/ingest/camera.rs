//! Camera frame source.
//!
//! Live capture from a local device node (e.g. /dev/video0). Under normal
//! operation a camera never signals end-of-stream; the only exits are a
//! stop request (handled by the controller) or a device failure surfaced
//! as a read error.
//!
//! Uses V4L2 for real devices behind the `ingest-v4l2` feature, with a
//! synthetic fallback for `stub://` device paths.

use anyhow::Result;
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;

use super::{FrameSource, SourceKind};
use crate::frame::Frame;
use crate::{FRAME_HEIGHT, FRAME_WIDTH};

pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCamera),
    /// Handle already released.
    Closed,
}

impl CameraSource {
    /// Open a camera device. `stub://` paths produce synthetic frames.
    pub fn open(device: &str) -> Result<Self> {
        if device.starts_with("stub://") {
            log::info!("CameraSource: opened {} (synthetic)", device);
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(device)),
            });
        }

        #[cfg(feature = "ingest-v4l2")]
        {
            let camera = DeviceCamera::open(device)?;
            log::info!("CameraSource: opened {}", device);
            Ok(Self {
                backend: CameraBackend::Device(camera),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            anyhow::bail!(
                "camera device {} requires the ingest-v4l2 feature",
                device
            )
        }
    }
}

impl FrameSource for CameraSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.read(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.read(),
            CameraBackend::Closed => Ok(None),
        }
    }

    fn close(&mut self) {
        if !matches!(self.backend, CameraBackend::Closed) {
            log::info!("CameraSource: released");
        }
        self.backend = CameraBackend::Closed;
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    device: String,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            frame_count: 0,
        }
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        self.frame_count += 1;
        let pixels = synthetic_pixels(self.frame_count);
        let frame = Frame::from_raw_rgb(pixels, FRAME_WIDTH, FRAME_HEIGHT)?;
        log::trace!("SyntheticCamera {}: frame {}", self.device, self.frame_count);
        Ok(Some(frame))
    }
}

/// Shift a simple gradient per frame so consecutive frames differ.
pub(crate) fn synthetic_pixels(frame_count: u64) -> Vec<u8> {
    let pixel_count = (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize;
    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + frame_count * 7) % 256) as u8;
    }
    pixels
}

// ----------------------------------------------------------------------------
// Production camera using V4L2
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceCamera {
    device: String,
    state: Option<DeviceCameraState>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceCameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceCamera {
    fn open(device_path: &str) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(device_path)
            .with_context(|| format!("open v4l2 device {}", device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = FRAME_WIDTH;
        format.height = FRAME_HEIGHT;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("CameraSource: failed to set format on {}: {}", device_path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let state = DeviceCameraStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        Ok(Self {
            device: device_path.to_string(),
            state: Some(state),
            active_width: format.width,
            active_height: format.height,
        })
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .with_context(|| format!("camera {} not open", self.device))?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;

        let frame = Frame::from_raw_rgb(buf.to_vec(), self.active_width, self.active_height)?;
        Ok(Some(frame))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_camera_never_ends() -> Result<()> {
        let mut source = CameraSource::open("stub://camera")?;
        for _ in 0..20 {
            assert!(source.read()?.is_some());
        }
        Ok(())
    }

    #[test]
    fn frames_are_canonical_size() -> Result<()> {
        let mut source = CameraSource::open("stub://camera")?;
        let frame = source.read()?.expect("frame");
        assert_eq!(frame.width(), FRAME_WIDTH);
        assert_eq!(frame.height(), FRAME_HEIGHT);
        Ok(())
    }

    #[test]
    fn close_is_idempotent_and_ends_reads() -> Result<()> {
        let mut source = CameraSource::open("stub://camera")?;
        source.close();
        source.close();
        assert!(source.read()?.is_none());
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_devices_require_the_feature() {
        assert!(CameraSource::open("/dev/video0").is_err());
    }
}
