//! NEXUS-77 Threat Detection HUD
//!
//! This crate implements the detection-and-rendering pipeline behind the
//! NEXUS-77 targeting overlay, plus the stream-lifecycle state machine that
//! drives it.
//!
//! # Architecture
//!
//! Frames flow through a fixed pipeline:
//!
//! 1. **Ingest**: an interchangeable `FrameSource` (camera, video file,
//!    still image) produces canonical 640x480 RGB frames.
//! 2. **Detect**: the `DetectionEngine` runs the pretrained network,
//!    filters proposals by confidence and collapses overlaps with
//!    non-max suppression.
//! 3. **Count**: `ThreatStats` records one threat per frame with at least
//!    one surviving detection.
//! 4. **Render**: the `OverlayRenderer` draws the targeting HUD (grid,
//!    scan line, brackets, labels) plus cosmetic glitch effects.
//! 5. **Emit**: the annotated frame is JPEG-encoded and published to a
//!    single-slot `FrameSink` for the transport to serve.
//!
//! The `StreamController` owns the whole loop. At most one session is
//! active process-wide; `start` while active completes a full `stop`
//! (source closed, worker joined) before the next source is opened.
//!
//! # Module Structure
//!
//! - `frame`: canonical frame buffer + JPEG encoding
//! - `ingest`: frame sources (camera, video file, still image)
//! - `detect`: inference engine, backends, non-max suppression
//! - `render`: HUD overlay, placeholder and error frames
//! - `stream`: session state machine + frame sink
//! - `stats`: process-lifetime threat counter
//! - `api`: minimal HTTP transport (stats, control, MJPEG feed)
//! - `config`: daemon configuration (file + env overrides)

use std::fmt;

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod render;
pub mod stats;
pub mod stream;

pub use detect::{Detection, DetectionEngine, DetectionResult, InferenceBackend, Proposal};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceKind, SourceSpec};
pub use render::OverlayRenderer;
pub use stats::{StatsSnapshot, ThreatStats};
pub use stream::{FrameSink, SharedFrameSink, StreamController};

/// Canonical frame width. Every pipeline stage assumes this dimension.
pub const FRAME_WIDTH: u32 = 640;
/// Canonical frame height.
pub const FRAME_HEIGHT: u32 = 480;
/// RGB.
pub const FRAME_CHANNELS: u32 = 3;

// -------------------- Error Kinds --------------------
//
// Recoverable failures carry a recognizable concrete type inside
// `anyhow::Error` so callers can `downcast_ref` on the kind instead of
// matching message strings.

/// Fatal: the network configuration or weight artifact is missing or
/// corrupt. Raised once at startup; the process must refuse to serve.
#[derive(Clone, Debug)]
pub struct ModelLoadError {
    pub message: String,
}

impl fmt::Display for ModelLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model load failed: {}", self.message)
    }
}
impl std::error::Error for ModelLoadError {}

/// Session-scoped: the requested source could not be opened. The
/// controller stays Idle.
#[derive(Clone, Debug)]
pub struct SourceUnavailable {
    pub message: String,
}

impl fmt::Display for SourceUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source unavailable: {}", self.message)
    }
}
impl std::error::Error for SourceUnavailable {}

/// Session-scoped: the source failed mid-stream. Ends the session; the
/// controller returns to Idle and flags the error in `stats()`.
#[derive(Clone, Debug)]
pub struct ReadError {
    pub message: String,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame read failed: {}", self.message)
    }
}
impl std::error::Error for ReadError {}

/// Validation: an uploaded image could not be decoded. Surfaces as an
/// explicit error frame, never as a transport failure.
#[derive(Clone, Debug)]
pub struct ImageDecodeError {
    pub message: String,
}

impl fmt::Display for ImageDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image decode failed: {}", self.message)
    }
}
impl std::error::Error for ImageDecodeError {}
