//! nexusd - NEXUS-77 threat detection daemon
//!
//! This daemon:
//! 1. Loads the detection network once at startup (missing or corrupt
//!    artifacts are fatal; the process refuses to serve)
//! 2. Owns the stream controller and its single-slot frame sink
//! 3. Serves the control surface and the MJPEG feed over HTTP
//! 4. Shuts the active session down cleanly on Ctrl-C

use std::sync::mpsc;
use std::sync::Arc;

use anyhow::Result;

use nexus_hud::api::{ApiConfig, ApiServer};
use nexus_hud::config::NexusConfig;
use nexus_hud::{DetectionEngine, OverlayRenderer, SharedFrameSink, StreamController};

fn main() -> Result<()> {
    // Initialize logging (simple stderr)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = NexusConfig::load()?;

    let engine = match DetectionEngine::load(&cfg.detector.model_path) {
        Ok(engine) => engine.with_thresholds(
            cfg.detector.confidence_threshold,
            cfg.detector.iou_threshold,
        ),
        Err(e) => {
            log::error!("fatal: {:#}", e);
            return Err(e);
        }
    };

    let sink = Arc::new(SharedFrameSink::new());
    let controller = Arc::new(
        StreamController::new(engine, OverlayRenderer::new(), sink.clone())
            .with_jpeg_quality(cfg.jpeg_quality)
            .with_video_fps(cfg.video_fps),
    );

    let api_cfg = ApiConfig {
        addr: cfg.api_addr.clone(),
        camera_device: cfg.camera_device.clone(),
    };
    let api = ApiServer::new(api_cfg, controller.clone(), sink).spawn()?;

    log::info!("nexusd {} serving on {}", env!("CARGO_PKG_VERSION"), api.addr);
    log::info!(
        "model={} camera={} video_fps={}",
        cfg.detector.model_path,
        cfg.camera_device,
        cfg.video_fps
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;
    let _ = shutdown_rx.recv();

    log::info!("shutting down");
    controller.stop()?;
    api.stop()?;
    Ok(())
}
