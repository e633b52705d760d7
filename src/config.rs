use anyhow::{anyhow, Result};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_USB_DEVICE: &str = "/dev/video0";
const DEFAULT_PI_COMMAND: &str = "libcamera-still";
const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REOPEN_ATTEMPTS: u32 = 1;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_TRIGGER_COOLDOWN_MS: u64 = 5_000;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REPORT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_STATUS_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_RETRY_FACTOR: f64 = 2.0;
const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
const DEFAULT_RETRY_JITTER: f64 = 0.1;
const DEFAULT_REPORT_ATTEMPTS: u32 = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_QUEUE_MAX_AGE_SECS: u64 = 60 * 60;
const DEFAULT_DETECTION_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_GATE_PIN: u8 = 18;
const DEFAULT_LED_PIN: u8 = 16;
const DEFAULT_GATE_OPEN_SECS: u64 = 5;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_AREA: &str = "area1";
const DEFAULT_PEAK_HOURS: [u32; 5] = [7, 8, 17, 18, 19];
const DEFAULT_PEAK_INTERVAL_SECS: u64 = 15;
const DEFAULT_OFF_PEAK_INTERVAL_SECS: u64 = 60;
const DEFAULT_AREA_ATTEMPTS: u32 = 3;

const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const MAX_QUEUE_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Deserialize, Default)]
struct AgentConfigFile {
    server_url: Option<String>,
    camera_id: Option<String>,
    camera_type: Option<String>,
    camera: Option<CameraConfigFile>,
    polling: Option<PollingConfigFile>,
    heartbeat: Option<HeartbeatConfigFile>,
    http: Option<HttpConfigFile>,
    retry: Option<RetryConfigFile>,
    queue: Option<QueueConfigFile>,
    detection: Option<DetectionConfigFile>,
    relay: Option<RelayConfigFile>,
    parking_monitor: Option<ParkingMonitorConfigFile>,
    commands: Option<CommandsConfigFile>,
    logging: Option<LoggingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    usb_device: Option<String>,
    pi_command: Option<String>,
    capture_timeout_ms: Option<u64>,
    reopen_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PollingConfigFile {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
    cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct HeartbeatConfigFile {
    interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    poll_timeout_ms: Option<u64>,
    report_timeout_ms: Option<u64>,
    status_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    base_delay_ms: Option<u64>,
    factor: Option<f64>,
    max_delay_ms: Option<u64>,
    jitter: Option<f64>,
    report_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    capacity: Option<usize>,
    max_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    enabled: Option<bool>,
    backend: Option<String>,
    timeout_ms: Option<u64>,
    command: Option<String>,
    args: Option<Vec<String>>,
    plate: Option<String>,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    backend: Option<String>,
    gate_pin: Option<u8>,
    led_pin: Option<u8>,
    open_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ParkingMonitorConfigFile {
    enabled: Option<bool>,
    areas: Option<Vec<String>>,
    peak_hours: Option<Vec<u32>>,
    #[serde(alias = "peak_interval")]
    peak_interval_secs: Option<u64>,
    #[serde(alias = "off_peak_interval")]
    off_peak_interval_secs: Option<u64>,
    attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CommandsConfigFile {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingConfigFile {
    level: Option<String>,
}

/// Which capture backend(s) the camera source may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraType {
    /// Dedicated Pi camera first, USB/V4L2 as fallback.
    Auto,
    Pi,
    Usb,
}

impl CameraType {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(CameraType::Auto),
            "pi" | "picamera" => Ok(CameraType::Pi),
            "usb" => Ok(CameraType::Usb),
            other => Err(anyhow!(
                "camera_type must be one of auto, pi, usb (got '{}')",
                other
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraType::Auto => "auto",
            CameraType::Pi => "pi",
            CameraType::Usb => "usb",
        }
    }
}

/// Functional identity of the camera, derived from `camera_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraRole {
    Entrance,
    Exit,
    Area,
    Other(String),
}

impl CameraRole {
    pub fn from_camera_id(camera_id: &str) -> Self {
        match camera_id {
            "entrance" => CameraRole::Entrance,
            "exit" => CameraRole::Exit,
            "area" => CameraRole::Area,
            other => CameraRole::Other(other.to_string()),
        }
    }

    /// Role label reported to the server.
    pub fn label(&self) -> &str {
        match self {
            CameraRole::Entrance => "entrance",
            CameraRole::Exit => "exit",
            CameraRole::Area => "parking_monitor",
            CameraRole::Other(id) => id,
        }
    }

    /// Polling endpoint for roles that receive capture triggers.
    pub fn trigger_path(&self) -> Option<&'static str> {
        match self {
            CameraRole::Entrance => Some("/api/camera/trigger-entrance"),
            CameraRole::Exit => Some("/api/camera/trigger-exit"),
            CameraRole::Area | CameraRole::Other(_) => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, CameraRole::Other(_))
    }
}

impl fmt::Display for CameraRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    None,
    Stub,
    Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayKind {
    Log,
    Gpio,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base server address without trailing slash.
    pub server_url: String,
    pub camera_id: String,
    pub role: CameraRole,
    pub camera_type: CameraType,
    pub camera: CameraSettings,
    pub polling: PollingSettings,
    pub heartbeat_interval: Duration,
    pub http: HttpSettings,
    pub retry: RetrySettings,
    pub queue: QueueSettings,
    pub detection: DetectionSettings,
    pub relay: RelaySettings,
    /// Scheduled captures; used by the `area` role only.
    pub area: AreaSettings,
    /// Execute commands returned in heartbeat responses.
    pub commands_enabled: bool,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub usb_device: String,
    pub pi_command: String,
    pub capture_timeout: Duration,
    pub reopen_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct PollingSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub poll_timeout: Duration,
    pub report_timeout: Duration,
    pub status_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub jitter: f64,
    pub report_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub capacity: usize,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub enabled: bool,
    pub backend: DetectorKind,
    pub timeout: Duration,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub plate: String,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub backend: RelayKind,
    pub gate_pin: u8,
    pub led_pin: u8,
    pub open_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct AreaSettings {
    pub enabled: bool,
    pub areas: Vec<String>,
    /// Local hours (0-23) that use `peak_interval`.
    pub peak_hours: Vec<u32>,
    pub peak_interval: Duration,
    pub off_peak_interval: Duration,
    /// Analysis upload attempts per capture.
    pub attempts: u32,
}

impl AgentConfig {
    /// Load, override from the environment and validate.
    ///
    /// Any failure here is a startup error: the agent must not start its loops.
    pub fn load(path: &Path) -> Result<Self> {
        let file_cfg = read_config_file(path)?;
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a JSON document without consulting the environment.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file_cfg: AgentConfigFile =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AgentConfigFile) -> Result<Self> {
        let camera_type = match file.camera_type.as_deref() {
            Some(value) => CameraType::parse(value)?,
            None => CameraType::Auto,
        };
        let camera_id = file.camera_id.unwrap_or_default().trim().to_string();
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            width: camera_file.width.unwrap_or(DEFAULT_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_HEIGHT),
            usb_device: camera_file
                .usb_device
                .unwrap_or_else(|| DEFAULT_USB_DEVICE.to_string()),
            pi_command: camera_file
                .pi_command
                .unwrap_or_else(|| DEFAULT_PI_COMMAND.to_string()),
            capture_timeout: Duration::from_millis(
                camera_file
                    .capture_timeout_ms
                    .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_MS),
            ),
            reopen_attempts: camera_file
                .reopen_attempts
                .unwrap_or(DEFAULT_REOPEN_ATTEMPTS),
        };
        let polling_file = file.polling.unwrap_or_default();
        let polling = PollingSettings {
            enabled: polling_file.enabled.unwrap_or(true),
            interval: Duration::from_millis(
                polling_file.interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            cooldown: Duration::from_millis(
                polling_file
                    .cooldown_ms
                    .unwrap_or(DEFAULT_TRIGGER_COOLDOWN_MS),
            ),
        };
        let heartbeat_interval = Duration::from_secs(
            file.heartbeat
                .and_then(|heartbeat| heartbeat.interval_secs)
                .unwrap_or(DEFAULT_HEARTBEAT_SECS),
        );
        let http_file = file.http.unwrap_or_default();
        let http = HttpSettings {
            poll_timeout: Duration::from_millis(
                http_file.poll_timeout_ms.unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
            ),
            report_timeout: Duration::from_millis(
                http_file
                    .report_timeout_ms
                    .unwrap_or(DEFAULT_REPORT_TIMEOUT_MS),
            ),
            status_timeout: Duration::from_millis(
                http_file
                    .status_timeout_ms
                    .unwrap_or(DEFAULT_STATUS_TIMEOUT_MS),
            ),
        };
        let retry_file = file.retry.unwrap_or_default();
        let retry = RetrySettings {
            base_delay: Duration::from_millis(
                retry_file.base_delay_ms.unwrap_or(DEFAULT_RETRY_BASE_MS),
            ),
            factor: retry_file.factor.unwrap_or(DEFAULT_RETRY_FACTOR),
            max_delay: Duration::from_millis(
                retry_file.max_delay_ms.unwrap_or(DEFAULT_RETRY_MAX_MS),
            ),
            jitter: retry_file.jitter.unwrap_or(DEFAULT_RETRY_JITTER),
            report_attempts: retry_file
                .report_attempts
                .unwrap_or(DEFAULT_REPORT_ATTEMPTS),
        };
        let queue_file = file.queue.unwrap_or_default();
        let queue = QueueSettings {
            capacity: queue_file.capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            max_age: Duration::from_secs(
                queue_file.max_age_secs.unwrap_or(DEFAULT_QUEUE_MAX_AGE_SECS),
            ),
        };
        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            enabled: detection_file.enabled.unwrap_or(true),
            backend: parse_detector_kind(detection_file.backend.as_deref())?,
            timeout: Duration::from_millis(
                detection_file
                    .timeout_ms
                    .unwrap_or(DEFAULT_DETECTION_TIMEOUT_MS),
            ),
            command: detection_file.command,
            args: detection_file.args.unwrap_or_default(),
            plate: detection_file.plate.unwrap_or_default(),
            confidence: detection_file.confidence.unwrap_or(0.0),
        };
        let relay_file = file.relay.unwrap_or_default();
        let relay = RelaySettings {
            backend: parse_relay_kind(relay_file.backend.as_deref())?,
            gate_pin: relay_file.gate_pin.unwrap_or(DEFAULT_GATE_PIN),
            led_pin: relay_file.led_pin.unwrap_or(DEFAULT_LED_PIN),
            open_duration: Duration::from_secs(
                relay_file.open_secs.unwrap_or(DEFAULT_GATE_OPEN_SECS),
            ),
        };
        let area_file = file.parking_monitor.unwrap_or_default();
        let area = AreaSettings {
            enabled: area_file.enabled.unwrap_or(true),
            areas: area_file
                .areas
                .unwrap_or_else(|| vec![DEFAULT_AREA.to_string()]),
            peak_hours: area_file
                .peak_hours
                .unwrap_or_else(|| DEFAULT_PEAK_HOURS.to_vec()),
            peak_interval: Duration::from_secs(
                area_file
                    .peak_interval_secs
                    .unwrap_or(DEFAULT_PEAK_INTERVAL_SECS),
            ),
            off_peak_interval: Duration::from_secs(
                area_file
                    .off_peak_interval_secs
                    .unwrap_or(DEFAULT_OFF_PEAK_INTERVAL_SECS),
            ),
            attempts: area_file.attempts.unwrap_or(DEFAULT_AREA_ATTEMPTS),
        };
        let commands_enabled = file
            .commands
            .and_then(|commands| commands.enabled)
            .unwrap_or(true);
        let log_level = file
            .logging
            .and_then(|logging| logging.level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            server_url: file.server_url.unwrap_or_default(),
            role: CameraRole::from_camera_id(&camera_id),
            camera_id,
            camera_type,
            camera,
            polling,
            heartbeat_interval,
            http,
            retry,
            queue,
            detection,
            relay,
            area,
            commands_enabled,
            log_level,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("PARKCAM_SERVER_URL") {
            if !url.trim().is_empty() {
                self.server_url = url;
            }
        }
        if let Ok(camera_id) = std::env::var("PARKCAM_CAMERA_ID") {
            if !camera_id.trim().is_empty() {
                self.camera_id = camera_id.trim().to_string();
                self.role = CameraRole::from_camera_id(&self.camera_id);
            }
        }
        if let Ok(camera_type) = std::env::var("PARKCAM_CAMERA_TYPE") {
            if !camera_type.trim().is_empty() {
                self.camera_type = CameraType::parse(&camera_type)?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let raw_url = self.server_url.trim();
        if raw_url.is_empty() {
            return Err(anyhow!("server_url is required"));
        }
        let parsed =
            Url::parse(raw_url).map_err(|e| anyhow!("server_url '{}' is invalid: {}", raw_url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(anyhow!(
                "server_url '{}' must be an http(s) URL with a host",
                raw_url
            ));
        }
        self.server_url = raw_url.trim_end_matches('/').to_string();

        if self.camera_id.is_empty() {
            return Err(anyhow!("camera_id is required"));
        }
        if !camera_id_pattern().is_match(&self.camera_id) {
            return Err(anyhow!(
                "camera_id '{}' must be 1-64 characters of [A-Za-z0-9_-]",
                self.camera_id
            ));
        }

        if self.polling.interval.is_zero() {
            return Err(anyhow!("polling.interval_ms must be greater than zero"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(anyhow!("heartbeat.interval_secs must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.camera.capture_timeout.is_zero() || self.detection.timeout.is_zero() {
            return Err(anyhow!("capture and detection timeouts must be non-zero"));
        }
        if self.http.poll_timeout.is_zero()
            || self.http.report_timeout.is_zero()
            || self.http.status_timeout.is_zero()
        {
            return Err(anyhow!("http timeouts must be non-zero"));
        }
        if !(self.retry.factor >= 1.0) {
            return Err(anyhow!("retry.factor must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(anyhow!("retry.jitter must be within [0, 1]"));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(anyhow!("retry.max_delay_ms must be >= retry.base_delay_ms"));
        }
        if self.retry.report_attempts == 0 {
            return Err(anyhow!("retry.report_attempts must be at least 1"));
        }
        if self.queue.capacity == 0 {
            return Err(anyhow!("queue.capacity must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detection.confidence) {
            return Err(anyhow!("detection.confidence must be within [0, 1]"));
        }
        if self.detection.backend == DetectorKind::Command && self.detection.command.is_none() {
            return Err(anyhow!(
                "detection.command is required for the command backend"
            ));
        }
        self.validate_area()?;

        for (name, value, max) in [
            ("polling.interval_ms", self.polling.interval, MAX_INTERVAL),
            ("polling.cooldown_ms", self.polling.cooldown, MAX_INTERVAL),
            ("heartbeat.interval_secs", self.heartbeat_interval, MAX_INTERVAL),
            ("retry.max_delay_ms", self.retry.max_delay, MAX_INTERVAL),
            ("queue.max_age_secs", self.queue.max_age, MAX_QUEUE_AGE),
            ("camera.capture_timeout_ms", self.camera.capture_timeout, MAX_TIMEOUT),
            ("detection.timeout_ms", self.detection.timeout, MAX_TIMEOUT),
            ("http.poll_timeout_ms", self.http.poll_timeout, MAX_TIMEOUT),
            ("http.report_timeout_ms", self.http.report_timeout, MAX_TIMEOUT),
            ("http.status_timeout_ms", self.http.status_timeout, MAX_TIMEOUT),
            ("relay.open_secs", self.relay.open_duration, MAX_TIMEOUT),
            ("parking_monitor.peak_interval_secs", self.area.peak_interval, MAX_INTERVAL),
            ("parking_monitor.off_peak_interval_secs", self.area.off_peak_interval, MAX_INTERVAL),
        ] {
            if value > max {
                return Err(anyhow!("{} must be at most {:?} (got {:?})", name, max, value));
            }
        }
        Ok(())
    }

    fn validate_area(&self) -> Result<()> {
        let area = &self.area;
        if area.areas.is_empty() {
            return Err(anyhow!("parking_monitor.areas must not be empty"));
        }
        // Area ids become URL path segments.
        if let Some(bad) = area.areas.iter().find(|id| !is_valid_identifier(id)) {
            return Err(anyhow!(
                "parking_monitor area '{}' must be 1-64 characters of [A-Za-z0-9_-]",
                bad
            ));
        }
        if let Some(hour) = area.peak_hours.iter().find(|hour| **hour > 23) {
            return Err(anyhow!("parking_monitor.peak_hours entry {} is not an hour", hour));
        }
        if area.peak_interval.is_zero() || area.off_peak_interval.is_zero() {
            return Err(anyhow!("parking_monitor intervals must be greater than zero"));
        }
        if area.attempts == 0 {
            return Err(anyhow!("parking_monitor.attempts must be at least 1"));
        }
        Ok(())
    }

    /// Non-fatal configuration problems, logged at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.role.is_known() {
            warnings.push(format!(
                "camera_id '{}' is not one of entrance, exit, area; running without trigger polling",
                self.camera_id
            ));
        }
        if self.role == CameraRole::Area && !self.area.enabled {
            warnings.push(
                "parking_monitor is disabled; the area camera will only send heartbeats"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Whether `value` is usable as a camera or area id: 1-64 of `[A-Za-z0-9_-]`.
pub fn is_valid_identifier(value: &str) -> bool {
    camera_id_pattern().is_match(value)
}

fn camera_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static regex"))
}

fn parse_detector_kind(value: Option<&str>) -> Result<DetectorKind> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("none") => Ok(DetectorKind::None),
        Some("stub") => Ok(DetectorKind::Stub),
        Some("command") => Ok(DetectorKind::Command),
        Some(other) => Err(anyhow!(
            "detection.backend must be one of none, stub, command (got '{}')",
            other
        )),
    }
}

fn parse_relay_kind(value: Option<&str>) -> Result<RelayKind> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("log") => Ok(RelayKind::Log),
        Some("gpio") => Ok(RelayKind::Gpio),
        Some(other) => Err(anyhow!(
            "relay.backend must be one of log, gpio (got '{}')",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<AgentConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
