//! Frame ingestion sources.
//!
//! This module provides the pull-based origins of raw frames:
//! - Camera devices (feature: ingest-v4l2, `stub://` synthetic fallback)
//! - Local video files (feature: ingest-file-ffmpeg, `stub://N` synthetic clip)
//! - Still images (decoded once via the image crate)
//!
//! All sources produce canonical 640x480 frames; any differently-sized
//! input is resized before it leaves the source. The ingestion layer is
//! responsible for:
//! - Owning the underlying capture handle
//! - Decoding frames in-memory
//! - Resizing to the canonical frame size
//!
//! The ingestion layer is NOT responsible for:
//! - Playback pacing (the stream controller throttles video files)
//! - Detection or rendering
//! - Retrying failed devices

use anyhow::Result;
use serde::Serialize;
use std::fmt;

pub mod camera;
pub mod file;
pub mod still;

pub use camera::CameraSource;
pub use file::VideoFileSource;
pub use still::StillImageSource;

use crate::frame::Frame;

/// The kind of source bound to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Camera,
    VideoFile,
    Image,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Camera => write!(f, "camera"),
            SourceKind::VideoFile => write!(f, "video_file"),
            SourceKind::Image => write!(f, "image"),
        }
    }
}

/// What to open: a source kind plus its location (device node, file path,
/// or a `stub://` synthetic location for tests).
#[derive(Clone, Debug)]
pub struct SourceSpec {
    pub kind: SourceKind,
    pub location: String,
}

impl SourceSpec {
    pub fn camera(location: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Camera,
            location: location.into(),
        }
    }

    pub fn video(location: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::VideoFile,
            location: location.into(),
        }
    }

    pub fn image(location: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Image,
            location: location.into(),
        }
    }
}

/// A pull-based origin of canonical frames.
///
/// `read` returns `Ok(Some(frame))` for the next frame, `Ok(None)` when
/// the stream is exhausted (video files after the last frame; still
/// images after the single frame; cameras never, under normal operation)
/// and `Err` for a mid-stream device failure.
///
/// `close` releases the capture handle and is idempotent: calling it
/// twice, or on a handle that never produced a frame, is safe.
pub trait FrameSource: Send {
    fn kind(&self) -> SourceKind;

    fn read(&mut self) -> Result<Option<Frame>>;

    fn close(&mut self);
}

/// Open the source described by `spec`.
///
/// Failures mean the session cannot start; the caller surfaces them as
/// `SourceUnavailable`. Still-image decode failures carry a recognizable
/// `ImageDecodeError` in the chain.
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn FrameSource>> {
    match spec.kind {
        SourceKind::Camera => Ok(Box::new(CameraSource::open(&spec.location)?)),
        SourceKind::VideoFile => Ok(Box::new(VideoFileSource::open(&spec.location)?)),
        SourceKind::Image => Ok(Box::new(StillImageSource::open(&spec.location)?)),
    }
}
