use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8077";
const DEFAULT_MODEL_PATH: &str = "stub://detector";
const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_VIDEO_FPS: u32 = 25;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.4;
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
struct NexusConfigFile {
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfigFile>,
    playback: Option<PlaybackConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model_path: Option<String>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PlaybackConfigFile {
    video_fps: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct NexusConfig {
    pub api_addr: String,
    pub detector: DetectorSettings,
    pub camera_device: String,
    pub video_fps: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model_path: String,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl NexusConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("NEXUS_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: NexusConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let detector = DetectorSettings {
            model_path: file
                .detector
                .as_ref()
                .and_then(|d| d.model_path.clone())
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            confidence_threshold: file
                .detector
                .as_ref()
                .and_then(|d| d.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: file
                .detector
                .as_ref()
                .and_then(|d| d.iou_threshold)
                .unwrap_or(DEFAULT_IOU_THRESHOLD),
        };
        let camera_device = file
            .camera
            .and_then(|camera| camera.device)
            .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string());
        let video_fps = file
            .playback
            .as_ref()
            .and_then(|playback| playback.video_fps)
            .unwrap_or(DEFAULT_VIDEO_FPS);
        let jpeg_quality = file
            .playback
            .and_then(|playback| playback.jpeg_quality)
            .unwrap_or(DEFAULT_JPEG_QUALITY);

        Self {
            api_addr,
            detector,
            camera_device,
            video_fps,
            jpeg_quality,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("NEXUS_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("NEXUS_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = path;
            }
        }
        if let Ok(device) = std::env::var("NEXUS_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera_device = device;
            }
        }
        if let Ok(fps) = std::env::var("NEXUS_VIDEO_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("NEXUS_VIDEO_FPS must be an integer frame rate"))?;
            self.video_fps = fps;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(anyhow!("iou_threshold must be within 0..=1"));
        }
        if self.video_fps == 0 {
            return Err(anyhow!("video_fps must be greater than zero"));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<NexusConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
