//! Stream lifecycle state machine.
//!
//! `StreamController` is the single serialized owner of session state. All
//! transitions go through one mutex-guarded session slot; the frame loop
//! runs on a dedicated worker thread that owns the source exclusively and
//! observes a stop flag at the top of every iteration.
//!
//! Invariants:
//! - At most one session is active process-wide.
//! - `start` while active completes the previous session's full stop
//!   (flag set, worker joined, source closed) before the new source is
//!   opened. The underlying device can serve only one open handle.
//! - After `stop` returns, the source handle has been released.
//! - `stats` reads a lock-free snapshot and never serializes with
//!   `start`/`stop` or the loop.
//!
//! Per frame: read -> infer -> count -> render -> encode -> publish.
//! Inference, render and encode failures drop that frame's emission and
//! nothing else; a read failure ends the session as a stream error;
//! end-of-stream ends it cleanly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;

use crate::detect::DetectionEngine;
use crate::frame::Frame;
use crate::ingest::{open_source, FrameSource, SourceKind, SourceSpec};
use crate::render::OverlayRenderer;
use crate::stats::{StatsSnapshot, ThreatStats};
use crate::{ImageDecodeError, ReadError, SourceUnavailable};

/// Nominal playback tick for video files (~25 fps).
const VIDEO_TICK: Duration = Duration::from_millis(40);
const DEFAULT_JPEG_QUALITY: u8 = 80;

// ----------------------------------------------------------------------------
// Frame sink
// ----------------------------------------------------------------------------

/// One encoded frame ready for the transport.
#[derive(Clone)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub sequence: u64,
}

/// Where rendered frames go. Emission is one-directional: the pipeline
/// publishes at its own pace and never waits for a consumer.
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: EncodedFrame);
}

/// Single-slot, latest-wins sink. Holds exactly one pending frame: a
/// stalled consumer skips frames instead of stalling detection, and
/// nothing buffers unboundedly.
pub struct SharedFrameSink {
    slot: Mutex<Option<EncodedFrame>>,
}

impl SharedFrameSink {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Latest published frame, if any.
    pub fn latest(&self) -> Option<EncodedFrame> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take the pending frame, leaving the slot empty until the next
    /// publish. Lets a feed loop serve each frame at most once.
    pub fn take_latest(&self) -> Option<EncodedFrame> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Default for SharedFrameSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for SharedFrameSink {
    fn publish(&self, frame: EncodedFrame) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// State shared between the controller and the worker loop.
struct SharedStatus {
    active: AtomicBool,
    kind: Mutex<Option<SourceKind>>,
    last_error: Mutex<Option<String>>,
}

impl SharedStatus {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            kind: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    fn set_active(&self, kind: SourceKind) {
        *self.kind.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.active.store(true, Ordering::SeqCst);
    }

    fn set_idle(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn record_error(&self, message: String) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message);
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct StreamController {
    session: Mutex<Option<Worker>>,
    engine: Arc<Mutex<DetectionEngine>>,
    renderer: Arc<Mutex<OverlayRenderer>>,
    stats: Arc<ThreatStats>,
    status: Arc<SharedStatus>,
    sink: Arc<dyn FrameSink>,
    sequence: Arc<AtomicU64>,
    jpeg_quality: u8,
    video_tick: Duration,
}

impl StreamController {
    pub fn new(
        engine: DetectionEngine,
        renderer: OverlayRenderer,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            session: Mutex::new(None),
            engine: Arc::new(Mutex::new(engine)),
            renderer: Arc::new(Mutex::new(renderer)),
            stats: Arc::new(ThreatStats::new()),
            status: Arc::new(SharedStatus::new()),
            sink,
            sequence: Arc::new(AtomicU64::new(0)),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            video_tick: VIDEO_TICK,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Override the nominal ~25 fps video playback pacing.
    pub fn with_video_fps(mut self, fps: u32) -> Self {
        self.video_tick = Duration::from_millis(1000 / u64::from(fps.max(1)));
        self
    }

    /// Start a session from a source spec.
    ///
    /// Open failures leave the controller Idle and return
    /// `SourceUnavailable`. An unreadable still image additionally
    /// publishes the explicit error frame so the feed shows what went
    /// wrong instead of an opaque failure.
    pub fn start(&self, spec: SourceSpec) -> Result<()> {
        let location = spec.location.clone();
        let result = self.start_with(spec.kind, || open_source(&spec));
        if let Err(err) = &result {
            if err.downcast_ref::<ImageDecodeError>().is_some() {
                let error_frame = self
                    .renderer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .error_frame("CANNOT LOAD IMAGE");
                self.publish_frame(error_frame);
            }
            log::warn!("session open failed for {}: {:#}", location, err);
        }
        result
    }

    /// Start a session from a custom source factory.
    ///
    /// The factory runs only after any previous session has fully stopped
    /// and released its source; starting never leaves two sources open
    /// concurrently.
    pub fn start_with<F>(&self, kind: SourceKind, open: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>>,
    {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        shutdown_worker(&mut session);

        let source = open().map_err(|e| {
            let unavailable = SourceUnavailable {
                message: format!("{}", kind),
            };
            e.context(unavailable)
        })?;

        self.status.set_active(kind);

        let stop = Arc::new(AtomicBool::new(false));
        let ctx = LoopContext {
            stop: stop.clone(),
            kind,
            engine: self.engine.clone(),
            renderer: self.renderer.clone(),
            stats: self.stats.clone(),
            status: self.status.clone(),
            sink: self.sink.clone(),
            sequence: self.sequence.clone(),
            jpeg_quality: self.jpeg_quality,
            video_tick: self.video_tick,
        };
        let handle = thread::Builder::new()
            .name("nexus-stream".into())
            .spawn(move || session_loop(ctx, source))
            .map_err(|e| {
                self.status.set_idle();
                anyhow::Error::new(e).context("spawn stream worker")
            })?;

        *session = Some(Worker { stop, handle });
        log::info!("session started: {}", kind);
        Ok(())
    }

    /// Stop the active session. Idle is a no-op success; the call is
    /// idempotent. On return the source handle has been released.
    pub fn stop(&self) -> Result<()> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        shutdown_worker(&mut session);
        Ok(())
    }

    /// Read-only snapshot. Callable from any state; may observe a state
    /// that changes immediately afterwards.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            threat_count: self.stats.threat_count(),
            active: self.status.active.load(Ordering::SeqCst),
            time: Local::now().format("%H:%M:%S").to_string(),
            last_error: self.status.last_error(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.active.load(Ordering::SeqCst)
    }

    /// Kind of the active session, `None` while Idle.
    pub fn active_kind(&self) -> Option<SourceKind> {
        if !self.is_active() {
            return None;
        }
        *self
            .status
            .kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_frame(&self, frame: Frame) {
        match frame.to_jpeg(self.jpeg_quality) {
            Ok(jpeg) => {
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                self.sink.publish(EncodedFrame { jpeg, sequence });
            }
            Err(e) => log::warn!("frame encode failed: {:#}", e),
        }
    }
}

fn shutdown_worker(session: &mut Option<Worker>) {
    if let Some(worker) = session.take() {
        worker.stop.store(true, Ordering::SeqCst);
        if worker.handle.join().is_err() {
            log::error!("stream worker panicked");
        }
    }
}

// ----------------------------------------------------------------------------
// Worker loop
// ----------------------------------------------------------------------------

struct LoopContext {
    stop: Arc<AtomicBool>,
    kind: SourceKind,
    engine: Arc<Mutex<DetectionEngine>>,
    renderer: Arc<Mutex<OverlayRenderer>>,
    stats: Arc<ThreatStats>,
    status: Arc<SharedStatus>,
    sink: Arc<dyn FrameSink>,
    sequence: Arc<AtomicU64>,
    jpeg_quality: u8,
    video_tick: Duration,
}

fn session_loop(ctx: LoopContext, mut source: Box<dyn FrameSource>) {
    loop {
        if ctx.stop.load(Ordering::SeqCst) {
            log::info!("session stop requested");
            break;
        }

        let tick = Instant::now();
        match source.read() {
            Ok(Some(frame)) => {
                process_frame(&ctx, frame);
                if ctx.kind == SourceKind::VideoFile {
                    throttle(&ctx.stop, tick, ctx.video_tick);
                }
            }
            Ok(None) => {
                log::info!("session reached end of stream");
                break;
            }
            Err(e) => {
                let err = ReadError {
                    message: format!("{:#}", e),
                };
                log::warn!("session ended: {}", err);
                ctx.status.record_error(err.to_string());
                break;
            }
        }
    }

    // Release the handle before the session reports Idle; `stop()` joins
    // this thread, so the handle is provably free once it returns.
    source.close();
    ctx.status.set_idle();
}

fn process_frame(ctx: &LoopContext, frame: Frame) {
    let result = {
        let Ok(mut engine) = ctx.engine.lock() else {
            log::error!("detection engine lock poisoned; frame dropped");
            return;
        };
        match engine.infer(&frame) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("inference failed; frame dropped: {:#}", e);
                return;
            }
        }
    };

    if !result.is_empty() {
        ctx.stats.record_threat_frame();
        log::debug!("threat frame: {} detection(s)", result.len());
    }

    let rendered = {
        let Ok(mut renderer) = ctx.renderer.lock() else {
            log::error!("renderer lock poisoned; frame dropped");
            return;
        };
        renderer.render(
            frame,
            &result,
            ctx.stats.threat_count(),
            ctx.stats.last_detection_age(),
            Local::now(),
        )
    };

    match rendered.to_jpeg(ctx.jpeg_quality) {
        Ok(jpeg) => {
            let sequence = ctx.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.sink.publish(EncodedFrame { jpeg, sequence });
        }
        Err(e) => log::warn!("encode failed; frame dropped: {:#}", e),
    }
}

/// Wait out the remainder of the playback tick, observing the stop flag
/// so `stop()` is never delayed by pacing.
fn throttle(stop: &AtomicBool, tick: Instant, video_tick: Duration) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let Some(remaining) = video_tick.checked_sub(tick.elapsed()) else {
            return;
        };
        thread::sleep(remaining.min(Duration::from_millis(5)));
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;

    fn idle_controller() -> (StreamController, Arc<SharedFrameSink>) {
        let engine = DetectionEngine::with_backend(Box::new(StubBackend::empty()));
        let renderer = OverlayRenderer::with_seed(1).with_effects(false);
        let sink = Arc::new(SharedFrameSink::new());
        (
            StreamController::new(engine, renderer, sink.clone()),
            sink,
        )
    }

    fn wait_until_idle(controller: &StreamController) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.is_active() {
            assert!(Instant::now() < deadline, "session did not finish in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn stop_while_idle_is_a_no_op_success() {
        let (controller, _sink) = idle_controller();
        assert!(controller.stop().is_ok());
        assert!(controller.stop().is_ok());
        assert!(!controller.is_active());
    }

    #[test]
    fn video_session_runs_to_end_of_stream() {
        let (controller, sink) = idle_controller();
        controller
            .start(SourceSpec::video("stub://3"))
            .expect("start video");

        wait_until_idle(&controller);
        let snapshot = controller.stats();
        assert!(!snapshot.active);
        assert!(snapshot.last_error.is_none());
        assert!(sink.latest().is_some());
    }

    #[test]
    fn open_failure_leaves_controller_idle() {
        let (controller, _sink) = idle_controller();
        let err = controller
            .start_with(SourceKind::Camera, || {
                anyhow::bail!("device busy")
            })
            .unwrap_err();

        assert!(err.downcast_ref::<SourceUnavailable>().is_some());
        assert!(!controller.is_active());
    }

    #[test]
    fn camera_session_stays_active_until_stopped() {
        let (controller, _sink) = idle_controller();
        controller
            .start(SourceSpec::camera("stub://camera"))
            .expect("start camera");

        assert!(controller.is_active());
        assert_eq!(controller.active_kind(), Some(SourceKind::Camera));

        controller.stop().expect("stop camera");
        assert!(!controller.is_active());
        assert_eq!(controller.active_kind(), None);
    }
}
