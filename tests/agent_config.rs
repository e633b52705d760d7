use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use parkcam_agent::config::{AgentConfig, CameraRole, DetectorKind, RelayKind};
use parkcam_agent::CameraType;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PARKCAM_SERVER_URL",
        "PARKCAM_CAMERA_ID",
        "PARKCAM_CAMERA_TYPE",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_full_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "server_url": "https://parking.example.com:8443/",
            "camera_id": "exit",
            "camera_type": "picamera",
            "camera": {
                "width": 1920,
                "height": 1080,
                "usb_device": "/dev/video2",
                "pi_command": "rpicam-still",
                "capture_timeout_ms": 8000,
                "reopen_attempts": 2
            },
            "polling": {"interval_ms": 1000, "cooldown_ms": 3000},
            "heartbeat": {"interval_secs": 60},
            "http": {"poll_timeout_ms": 2000, "report_timeout_ms": 15000, "status_timeout_ms": 3000},
            "retry": {"base_delay_ms": 250, "factor": 3.0, "max_delay_ms": 10000, "jitter": 0.2, "report_attempts": 6},
            "queue": {"capacity": 16, "max_age_secs": 600},
            "detection": {"backend": "command", "command": "/opt/alpr/detect", "args": ["--json"], "timeout_ms": 4000},
            "relay": {"backend": "gpio", "gate_pin": 23, "led_pin": 24, "open_secs": 8},
            "logging": {"level": "debug"}
        }"#,
    );

    let cfg = AgentConfig::load(file.path()).expect("load config");
    assert_eq!(cfg.server_url, "https://parking.example.com:8443");
    assert_eq!(cfg.camera_id, "exit");
    assert_eq!(cfg.role, CameraRole::Exit);
    assert_eq!(cfg.camera_type, CameraType::Pi);
    assert_eq!((cfg.camera.width, cfg.camera.height), (1920, 1080));
    assert_eq!(cfg.camera.usb_device, "/dev/video2");
    assert_eq!(cfg.camera.pi_command, "rpicam-still");
    assert_eq!(cfg.camera.capture_timeout, Duration::from_secs(8));
    assert_eq!(cfg.camera.reopen_attempts, 2);
    assert_eq!(cfg.polling.interval, Duration::from_secs(1));
    assert_eq!(cfg.polling.cooldown, Duration::from_secs(3));
    assert_eq!(cfg.heartbeat_interval, Duration::from_secs(60));
    assert_eq!(cfg.http.report_timeout, Duration::from_secs(15));
    assert_eq!(cfg.retry.base_delay, Duration::from_millis(250));
    assert_eq!(cfg.retry.factor, 3.0);
    assert_eq!(cfg.retry.report_attempts, 6);
    assert_eq!(cfg.queue.capacity, 16);
    assert_eq!(cfg.queue.max_age, Duration::from_secs(600));
    assert_eq!(cfg.detection.backend, DetectorKind::Command);
    assert_eq!(cfg.detection.command.as_deref(), Some("/opt/alpr/detect"));
    assert_eq!(cfg.detection.args, vec!["--json"]);
    assert_eq!(cfg.relay.backend, RelayKind::Gpio);
    assert_eq!((cfg.relay.gate_pin, cfg.relay.led_pin), (23, 24));
    assert_eq!(cfg.relay.open_duration, Duration::from_secs(8));
    assert_eq!(cfg.log_level, "debug");
    assert!(cfg.warnings().is_empty());
}

#[test]
fn env_overrides_file_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{"server_url": "http://old:5000", "camera_id": "entrance"}"#);
    std::env::set_var("PARKCAM_SERVER_URL", "http://10.0.0.5:5000");
    std::env::set_var("PARKCAM_CAMERA_ID", "exit");
    std::env::set_var("PARKCAM_CAMERA_TYPE", "usb");

    let cfg = AgentConfig::load(file.path()).expect("load config");
    assert_eq!(cfg.server_url, "http://10.0.0.5:5000");
    assert_eq!(cfg.role, CameraRole::Exit);
    assert_eq!(cfg.camera_type, CameraType::Usb);

    clear_env();
}

#[test]
fn missing_file_is_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let err = AgentConfig::load(&dir.path().join("config.json")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn missing_required_keys_are_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{"camera_type": "auto"}"#);
    let err = AgentConfig::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("server_url"));

    let file = write_config(r#"{"server_url": "http://x", "camera_type": "auto"}"#);
    let err = AgentConfig::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("camera_id"));

    let file = write_config("{not json");
    assert!(AgentConfig::load(file.path()).is_err());
}
