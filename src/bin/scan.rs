//! scan - one-shot image annotator
//!
//! Runs the detection pipeline over a single image and writes the
//! annotated JPEG. Useful for checking a model and the overlay without
//! starting the daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

use nexus_hud::ingest::StillImageSource;
use nexus_hud::{DetectionEngine, FrameSource, OverlayRenderer};

#[derive(Parser, Debug)]
#[command(
    name = "scan",
    about = "Run threat detection over one image and write the annotated JPEG"
)]
struct Args {
    /// Input image (JPEG or PNG)
    input: PathBuf,

    /// Output path for the annotated JPEG
    #[arg(short, long, default_value = "scan_output.jpg")]
    output: PathBuf,

    /// Model path (stub:// selects the scripted stub backend)
    #[arg(long, env = "NEXUS_MODEL_PATH", default_value = "stub://detector")]
    model: String,

    /// Seed the cosmetic effects for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut engine = DetectionEngine::load(&args.model)?;
    let mut source = StillImageSource::open(&args.input.to_string_lossy())?;
    let frame = source
        .read()?
        .ok_or_else(|| anyhow!("image source produced no frame"))?;

    let result = engine.infer(&frame)?;

    let mut renderer = match args.seed {
        Some(seed) => OverlayRenderer::with_seed(seed),
        None => OverlayRenderer::new(),
    };
    let threat_count = u64::from(!result.is_empty());
    let last_detection_age = (!result.is_empty()).then_some(Duration::ZERO);
    let annotated = renderer.render(
        frame,
        &result,
        threat_count,
        last_detection_age,
        chrono::Local::now(),
    );

    std::fs::write(&args.output, annotated.to_jpeg(90)?)?;
    log::info!(
        "wrote {} ({} detection(s))",
        args.output.display(),
        result.len()
    );
    Ok(())
}
