use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use shoplift_watch::config::{FrameFormat, RuleKind, WatchConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SHOPLIFT_CONFIG",
        "SHOPLIFT_MODEL_PATH",
        "SHOPLIFT_BACKEND",
        "SHOPLIFT_OUTPUT_DIR",
        "SHOPLIFT_THRESHOLD",
        "SHOPLIFT_ALERT_CLASS",
        "SHOPLIFT_STREAM_URL",
        "SHOPLIFT_PERSIST",
        "SHOPLIFT_CLASS_NAMES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = WatchConfig::load().expect("load defaults");
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.input_size, 640);
    assert_eq!(cfg.detector.class_names, vec!["normal", "shoplifting"]);
    assert_eq!(cfg.decision.rule, RuleKind::AlertClass);
    assert_eq!(cfg.decision.threshold, 0.5);
    assert_eq!(cfg.alert_class_id().unwrap(), 1);
    assert_eq!(cfg.output.output_dir, PathBuf::from("tested"));
    assert!(cfg.output.persist);
    assert_eq!(cfg.playback.gif_delay, Duration::from_millis(100));
    assert!(cfg.stream_url.is_none());
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::with_suffix(".json").expect("temp config");
    let json = r#"{
        "detector": {
            "backend": "stub",
            "input_size": 320,
            "class_names": ["person", "shoplifting", "cart"],
            "iou_threshold": 0.6
        },
        "decision": {
            "rule": "person_count",
            "alert_class": "person",
            "threshold": 0.4,
            "min_count": 2
        },
        "annotation": {
            "alert_color": [255, 128, 0],
            "show_normal_banner": true
        },
        "playback": {
            "tick_interval_ms": 33,
            "gif_delay_ms": 80,
            "use_worker": true
        },
        "output": {
            "output_dir": "/var/lib/shoplift/frames",
            "image_format": "png"
        },
        "stream": {
            "url": "rtsp://camera-1/live"
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SHOPLIFT_CONFIG", file.path());
    std::env::set_var("SHOPLIFT_THRESHOLD", "0.7");
    std::env::set_var("SHOPLIFT_PERSIST", "false");
    std::env::set_var("SHOPLIFT_STREAM_URL", "rtsp://camera-2/live");

    let cfg = WatchConfig::load().expect("load config");

    assert_eq!(cfg.detector.input_size, 320);
    assert_eq!(cfg.detector.iou_threshold, 0.6);
    assert_eq!(cfg.decision.rule, RuleKind::PersonCount);
    assert_eq!(cfg.decision.min_count, 2);
    assert_eq!(cfg.decision.threshold, 0.7);
    assert_eq!(cfg.alert_class_id().unwrap(), 0);
    assert_eq!(cfg.annotation.alert_color, [255, 128, 0]);
    assert!(cfg.annotation.show_normal_banner);
    assert_eq!(cfg.annotation.normal_color, [0, 255, 0]);
    assert_eq!(cfg.playback.tick_interval, Duration::from_millis(33));
    assert_eq!(cfg.playback.gif_delay, Duration::from_millis(80));
    assert!(cfg.playback.use_worker);
    assert_eq!(cfg.output.output_dir, PathBuf::from("/var/lib/shoplift/frames"));
    assert_eq!(cfg.output.image_format, FrameFormat::Png);
    assert!(!cfg.output.persist);
    assert_eq!(cfg.stream_url.as_deref(), Some("rtsp://camera-2/live"));
    assert_eq!(cfg.build_rule().unwrap().name(), "person_count");

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::with_suffix(".toml").expect("temp config");
    let toml = r#"
[detector]
backend = "stub"
model_path = "models/shoplift.onnx"

[decision]
alert_class = "normal"
threshold = 0.25

[output]
output_dir = "runs"
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("SHOPLIFT_CONFIG", file.path());
    std::env::set_var("SHOPLIFT_OUTPUT_DIR", "override");

    let cfg = WatchConfig::load().expect("load config");
    assert_eq!(
        cfg.detector.model_path,
        Some(PathBuf::from("models/shoplift.onnx"))
    );
    assert_eq!(cfg.alert_class_id().unwrap(), 0);
    assert_eq!(cfg.decision.threshold, 0.25);
    assert_eq!(cfg.output.output_dir, PathBuf::from("override"));

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SHOPLIFT_THRESHOLD", "1.5");
    assert!(WatchConfig::load().is_err());

    std::env::set_var("SHOPLIFT_THRESHOLD", "high");
    assert!(WatchConfig::load().is_err());
    std::env::remove_var("SHOPLIFT_THRESHOLD");

    std::env::set_var("SHOPLIFT_ALERT_CLASS", "loitering");
    assert!(WatchConfig::load().is_err());
    std::env::remove_var("SHOPLIFT_ALERT_CLASS");

    std::env::set_var("SHOPLIFT_PERSIST", "sometimes");
    assert!(WatchConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SHOPLIFT_CONFIG", "/definitely/not/here.json");
    assert!(WatchConfig::load().is_err());

    clear_env();
}
