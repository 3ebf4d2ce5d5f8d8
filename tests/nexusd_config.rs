use std::sync::Mutex;

use tempfile::NamedTempFile;

use nexus_hud::config::NexusConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "NEXUS_CONFIG",
        "NEXUS_API_ADDR",
        "NEXUS_MODEL_PATH",
        "NEXUS_CAMERA_DEVICE",
        "NEXUS_VIDEO_FPS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = NexusConfig::load().expect("load defaults");

    assert_eq!(cfg.api_addr, "127.0.0.1:8077");
    assert_eq!(cfg.detector.model_path, "stub://detector");
    assert_eq!(cfg.detector.confidence_threshold, 0.5);
    assert_eq!(cfg.detector.iou_threshold, 0.4);
    assert_eq!(cfg.camera_device, "stub://camera");
    assert_eq!(cfg.video_fps, 25);
    assert_eq!(cfg.jpeg_quality, 80);

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": { "addr": "0.0.0.0:9000" },
        "detector": {
            "model_path": "/var/lib/nexus/threat.onnx",
            "confidence_threshold": 0.6,
            "iou_threshold": 0.45
        },
        "camera": { "device": "/dev/video2" },
        "playback": { "video_fps": 30, "jpeg_quality": 90 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("NEXUS_CONFIG", file.path());
    std::env::set_var("NEXUS_CAMERA_DEVICE", "/dev/video0");
    std::env::set_var("NEXUS_VIDEO_FPS", "50");

    let cfg = NexusConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.detector.model_path, "/var/lib/nexus/threat.onnx");
    assert_eq!(cfg.detector.confidence_threshold, 0.6);
    assert_eq!(cfg.detector.iou_threshold, 0.45);
    assert_eq!(cfg.camera_device, "/dev/video0");
    assert_eq!(cfg.video_fps, 50);
    assert_eq!(cfg.jpeg_quality, 90);

    clear_env();
}

#[test]
fn out_of_range_thresholds_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "detector": { "confidence_threshold": 1.5 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("NEXUS_CONFIG", file.path());

    assert!(NexusConfig::load().is_err());

    clear_env();
}

#[test]
fn malformed_fps_override_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("NEXUS_VIDEO_FPS", "fast");
    assert!(NexusConfig::load().is_err());

    clear_env();
}
