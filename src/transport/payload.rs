//! Wire formats for the parking server API.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detect::PlateReading;
use crate::system::SystemMetrics;

pub const DETECTION_RESULT_PATH: &str = "/api/detection/result";
pub const CAMERA_STATUS_PATH: &str = "/api/camera/status";
pub const COMMAND_RESULT_PATH: &str = "/api/camera/command-result";
const PARKING_ANALYSIS_PREFIX: &str = "/api/parking-analysis/";

/// Upload path for one parking area.
pub fn parking_analysis_path(area_id: &str) -> String {
    format!("{}{}", PARKING_ANALYSIS_PREFIX, area_id)
}

/// Outcome of one capture cycle, ready to be reported.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub camera_id: String,
    /// Empty when nothing was detected or detection failed.
    pub plate: String,
    /// Within [0, 1].
    pub confidence: f32,
    pub image: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl DetectionResult {
    /// `captured_at` is when the frame was taken, not when it is reported.
    pub fn new(
        camera_id: &str,
        reading: Option<PlateReading>,
        image: Vec<u8>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let (plate, confidence) = match reading {
            Some(reading) => (reading.plate, reading.confidence),
            None => (String::new(), 0.0),
        };
        Self {
            camera_id: camera_id.to_string(),
            plate,
            confidence,
            image,
            timestamp: captured_at,
        }
    }

    pub fn to_payload(&self) -> DetectionPayload {
        DetectionPayload {
            camera_id: self.camera_id.clone(),
            detected_plate: self.plate.clone(),
            confidence: self.confidence,
            image_data: BASE64.encode(&self.image),
            timestamp: iso8601(self.timestamp),
        }
    }
}

/// Body of `POST /api/detection/result`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionPayload {
    pub camera_id: String,
    pub detected_plate: String,
    pub confidence: f32,
    pub image_data: String,
    pub timestamp: String,
}

/// Body of `POST /api/parking-analysis/{area_id}`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AreaCapturePayload {
    pub area_id: String,
    pub image_data: String,
    pub timestamp: String,
    pub camera_id: String,
}

impl AreaCapturePayload {
    pub fn new(camera_id: &str, area_id: &str, image: &[u8], captured_at: DateTime<Utc>) -> Self {
        Self {
            area_id: area_id.to_string(),
            image_data: BASE64.encode(image),
            timestamp: iso8601(captured_at),
            camera_id: camera_id.to_string(),
        }
    }
}

/// Server analysis of one parking area. Missing counts read as zero.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AreaOccupancy {
    pub vehicle_count: u32,
    pub available_slots: u32,
    pub total_slots: u32,
    /// Fraction in [0, 1].
    pub occupancy_rate: f64,
}

impl AreaOccupancy {
    pub fn parse(body: &str) -> Result<Self, String> {
        serde_json::from_str(body).map_err(|e| format!("invalid parking analysis: {}", e))
    }

    pub fn is_full(&self) -> bool {
        self.available_slots == 0
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_full() {
            "full"
        } else {
            "available"
        }
    }
}

/// Latest known occupancy of an area, as carried in the heartbeat.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AreaStatus {
    #[serde(flatten)]
    pub occupancy: AreaOccupancy,
    /// `full` or `available`.
    pub status: String,
    pub last_update: String,
}

impl AreaStatus {
    pub fn new(occupancy: AreaOccupancy, updated_at: DateTime<Utc>) -> Self {
        Self {
            status: occupancy.status_label().to_string(),
            occupancy,
            last_update: iso8601(updated_at),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

/// Body of `POST /api/camera/command-result`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub command_id: String,
    pub status: CommandStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResult {
    pub fn success(command_id: &str, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.to_string(),
            status: CommandStatus::Success,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(command_id: &str, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.to_string(),
            status: CommandStatus::Error,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Body of `POST /api/camera/status`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusPayload {
    pub camera_id: String,
    pub camera_role: String,
    /// `online` or `degraded`.
    pub status: String,
    pub camera_type: String,
    pub camera_available: bool,
    pub last_successful_poll: Option<String>,
    pub last_capture_success: Option<bool>,
    pub pending_reports: usize,
    pub dropped_reports: u64,
    pub cycles_completed: u64,
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub camera_reopens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemMetrics>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parking_areas: BTreeMap<String, AreaStatus>,
    pub timestamp: String,
}

/// Decision returned by the server for a detection report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerAction {
    Grant,
    Deny,
    Ack,
    Unknown(String),
}

impl ServerAction {
    pub fn parse(action: &str) -> Self {
        match action.trim().to_ascii_lowercase().as_str() {
            "grant" | "granted" | "allow" | "open" | "open_gate" => ServerAction::Grant,
            "deny" | "denied" | "reject" | "rejected" => ServerAction::Deny,
            "ack" | "none" | "ok" | "" => ServerAction::Ack,
            other => ServerAction::Unknown(other.to_string()),
        }
    }

    /// Extract the action from a report response body.
    ///
    /// A body without an `action` field acknowledges the report; a body that is not
    /// JSON at all yields `Unknown`.
    pub fn from_response_body(body: &str) -> Self {
        if body.trim().is_empty() {
            return ServerAction::Ack;
        }
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => match map.get("action") {
                Some(Value::String(action)) => ServerAction::parse(action),
                Some(Value::Null) | None => ServerAction::Ack,
                Some(other) => ServerAction::Unknown(other.to_string()),
            },
            Ok(other) => ServerAction::Unknown(other.to_string()),
            Err(_) => ServerAction::Unknown(body.trim().chars().take(64).collect()),
        }
    }
}

/// Parsed trigger poll response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerPoll {
    pub present: bool,
    /// Server-issued token identifying the trigger event, when provided.
    pub server_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    #[serde(default)]
    trigger: Option<bool>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    trigger_id: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

impl TriggerPoll {
    pub fn parse(body: &str) -> Result<Self, String> {
        let response: TriggerResponse =
            serde_json::from_str(body).map_err(|e| format!("invalid trigger response: {}", e))?;
        let present = response.trigger.or(response.success).unwrap_or(false);
        let server_id = response
            .trigger_id
            .or(response.id)
            .and_then(|value| match value {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Ok(Self { present, server_id })
    }
}

pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
