use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use live_detect::config::{ConfigOverrides, LiveDetectConfig, RunMode};
use live_detect::device::DevicePreference;
use live_detect::platform::SourceId;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LIVE_DETECT_CONFIG",
        "LIVE_DETECT_MODEL",
        "LIVE_DETECT_THRESHOLD",
        "LIVE_DETECT_SOURCE",
        "LIVE_DETECT_DEVICE",
    ] {
        std::env::remove_var(key);
    }
}

fn console() -> ConfigOverrides {
    ConfigOverrides {
        mode: Some(RunMode::Console),
        ..ConfigOverrides::default()
    }
}

#[test]
fn environment_overrides_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LIVE_DETECT_MODEL", "models/yolo.onnx");
    std::env::set_var("LIVE_DETECT_THRESHOLD", "0.35");
    std::env::set_var("LIVE_DETECT_SOURCE", "2");
    std::env::set_var("LIVE_DETECT_DEVICE", "cuda");

    let cfg = LiveDetectConfig::load(None, &console()).expect("load config");
    assert_eq!(cfg.model.path, PathBuf::from("models/yolo.onnx"));
    assert_eq!(cfg.threshold, 0.35);
    assert_eq!(cfg.source, Some(SourceId::Index(2)));
    assert_eq!(cfg.device, DevicePreference::Gpu);

    clear_env();
}

#[test]
fn loads_config_file_named_by_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "mode": "minimal",
        "threshold": 0.5,
        "device": "cpu",
        "source": "/dev/video2",
        "max_frames": 100,
        "model": { "path": "weights/custom.onnx", "input_size": 416 },
        "export": { "enabled": false },
        "console": { "status_interval": 10 },
        "fps_log_interval": 60
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("LIVE_DETECT_CONFIG", file.path());

    let cfg = LiveDetectConfig::load(None, &ConfigOverrides::default()).expect("load config");
    assert_eq!(cfg.mode, RunMode::Minimal);
    assert_eq!(cfg.threshold, 0.5);
    assert_eq!(cfg.device, DevicePreference::Cpu);
    assert_eq!(cfg.source, Some(SourceId::Path("/dev/video2".to_string())));
    assert_eq!(cfg.max_frames, Some(100));
    assert_eq!(cfg.model.path, PathBuf::from("weights/custom.onnx"));
    assert_eq!(cfg.model.input_size, 416);
    assert!(!cfg.export.enabled);
    assert_eq!(cfg.status_interval, 10);
    assert_eq!(cfg.fps_log_interval, 60);

    clear_env();
}

#[test]
fn command_line_beats_environment_and_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"threshold": 0.3, "mode": "console"}"#)
        .expect("write config");
    std::env::set_var("LIVE_DETECT_CONFIG", file.path());
    std::env::set_var("LIVE_DETECT_THRESHOLD", "0.4");

    let overrides = ConfigOverrides {
        threshold: Some(0.9),
        source: Some("stub://cam".to_string()),
        no_export: true,
        ..ConfigOverrides::default()
    };
    let cfg = LiveDetectConfig::load(None, &overrides).expect("load config");
    assert_eq!(cfg.threshold, 0.9);
    assert_eq!(cfg.mode, RunMode::Console);
    assert_eq!(cfg.source, Some(SourceId::Path("stub://cam".to_string())));
    assert!(!cfg.export.enabled);

    clear_env();
}

#[test]
fn malformed_environment_values_are_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LIVE_DETECT_THRESHOLD", "high");
    let err = LiveDetectConfig::load(None, &console()).unwrap_err();
    assert!(err.to_string().contains("LIVE_DETECT_THRESHOLD"));

    clear_env();
    std::env::set_var("LIVE_DETECT_DEVICE", "tpu");
    let err = LiveDetectConfig::load(None, &console()).unwrap_err();
    assert!(err.to_string().contains("unknown device"));

    clear_env();
}

#[test]
fn unknown_config_keys_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"treshold": 0.3}"#).expect("write config");
    let err = LiveDetectConfig::load(Some(file.path()), &console()).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));
}
