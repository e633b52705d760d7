//! Health bookkeeping and the periodic heartbeat.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::camera::CameraStats;
use crate::command::{CommandHandler, CommandRequest};
use crate::config::AgentConfig;
use crate::error::TransportError;
use crate::orchestrator::CycleState;
use crate::shutdown::Shutdown;
use crate::system::SystemSampler;
use crate::transport::payload::iso8601;
use crate::transport::{AreaStatus, StatusPayload, TransportClient};

/// Point-in-time copy of [`AgentHealth`].
#[derive(Clone, Debug)]
pub struct HealthSnapshot {
    pub last_successful_poll: Option<DateTime<Utc>>,
    /// `None` until the first capture attempt.
    pub last_capture_success: Option<bool>,
    pub camera_available: bool,
    pub active_backend: Option<&'static str>,
    pub cycle_state: CycleState,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub camera_stats: CameraStats,
    /// Latest analysis per parking area.
    pub areas: BTreeMap<String, AreaStatus>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            last_successful_poll: None,
            last_capture_success: None,
            camera_available: true,
            active_backend: None,
            cycle_state: CycleState::Idle,
            cycles_started: 0,
            cycles_completed: 0,
            camera_stats: CameraStats::default(),
            areas: BTreeMap::new(),
        }
    }
}

/// Health record written by the poller and orchestrator, read by the heartbeat.
#[derive(Default)]
pub struct AgentHealth {
    inner: Mutex<HealthSnapshot>,
}

impl AgentHealth {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HealthSnapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_poll(&self) {
        self.lock().last_successful_poll = Some(Utc::now());
    }

    pub fn record_capture(&self, success: bool, backend: Option<&'static str>, available: bool) {
        let mut health = self.lock();
        health.last_capture_success = Some(success);
        health.camera_available = available;
        health.active_backend = backend;
    }

    /// Camera reachability outside a capture, e.g. after a restart.
    pub fn record_camera(&self, backend: Option<&'static str>, available: bool) {
        let mut health = self.lock();
        health.camera_available = available;
        health.active_backend = backend;
    }

    pub fn record_camera_stats(&self, stats: &CameraStats) {
        self.lock().camera_stats = stats.clone();
    }

    pub fn record_area(&self, area_id: &str, status: AreaStatus) {
        self.lock().areas.insert(area_id.to_string(), status);
    }

    pub fn set_cycle_state(&self, state: CycleState) {
        self.lock().cycle_state = state;
    }

    pub fn cycle_started(&self) {
        self.lock().cycles_started += 1;
    }

    pub fn cycle_finished(&self) {
        self.lock().cycles_completed += 1;
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.lock().clone()
    }
}

/// Sends a heartbeat on its own interval and runs the commands the server answers with.
pub struct StatusReporter {
    client: Arc<TransportClient>,
    health: Arc<AgentHealth>,
    sampler: Mutex<SystemSampler>,
    commands: Option<CommandHandler>,
    camera_id: String,
    camera_role: String,
    camera_type: &'static str,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(config: &AgentConfig, client: Arc<TransportClient>, health: Arc<AgentHealth>) -> Self {
        Self {
            client,
            health,
            sampler: Mutex::new(SystemSampler::new()),
            commands: None,
            camera_id: config.camera_id.clone(),
            camera_role: config.role.label().to_string(),
            camera_type: config.camera_type.as_str(),
            interval: config.heartbeat_interval,
        }
    }

    /// Execute commands found in heartbeat responses.
    pub fn with_commands(mut self, handler: CommandHandler) -> Self {
        self.commands = Some(handler);
        self
    }

    pub fn build_payload(&self, dropped_reports: u64) -> StatusPayload {
        let health = self.health.snapshot();
        let pending_reports = self.client.pending().len();
        let degraded = !health.camera_available
            || health.last_capture_success == Some(false)
            || pending_reports > 0
            || dropped_reports > 0;
        StatusPayload {
            camera_id: self.camera_id.clone(),
            camera_role: self.camera_role.clone(),
            status: if degraded { "degraded" } else { "online" }.to_string(),
            camera_type: health
                .active_backend
                .unwrap_or(self.camera_type)
                .to_string(),
            camera_available: health.camera_available,
            last_successful_poll: health.last_successful_poll.map(iso8601),
            last_capture_success: health.last_capture_success,
            pending_reports,
            dropped_reports,
            cycles_completed: health.cycles_completed,
            frames_captured: health.camera_stats.frames_captured,
            capture_failures: health.camera_stats.capture_failures,
            camera_reopens: health.camera_stats.reopens,
            system: Some(
                self.sampler
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .sample(),
            ),
            parking_areas: health.areas,
            timestamp: iso8601(Utc::now()),
        }
    }

    /// Send one heartbeat, then run any commands in the response.
    ///
    /// Drop counts are given back if the heartbeat fails. Returns how many commands
    /// were received.
    pub fn send_once(&self) -> Result<usize, TransportError> {
        let dropped = self.client.pending().take_unreported_drops();
        let payload = self.build_payload(dropped);
        match self.client.send_status(&payload) {
            Ok(body) => {
                log::debug!("heartbeat sent ({})", payload.status);
                let requests = CommandRequest::from_status_body(&body);
                match &self.commands {
                    Some(handler) => {
                        for request in &requests {
                            handler.handle(request, &payload);
                        }
                    }
                    None if !requests.is_empty() => {
                        log::info!("ignoring {} server command(s), commands disabled", requests.len());
                    }
                    None => {}
                }
                Ok(requests.len())
            }
            Err(err) => {
                self.client.pending().restore_unreported_drops(dropped);
                Err(err)
            }
        }
    }

    pub fn run(self, shutdown: Shutdown) {
        log::info!("status reporter started, every {:?}", self.interval);
        loop {
            if let Err(err) = self.send_once() {
                log::warn!("heartbeat failed: {}", err);
            }
            if shutdown.wait_timeout(self.interval) {
                break;
            }
        }
        log::info!("status reporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_starts_available_and_idle() {
        let health = AgentHealth::new();
        let snapshot = health.snapshot();
        assert!(snapshot.camera_available);
        assert_eq!(snapshot.cycle_state, CycleState::Idle);
        assert!(snapshot.last_successful_poll.is_none());
    }

    #[test]
    fn records_capture_and_cycles() {
        let health = AgentHealth::new();
        health.cycle_started();
        health.record_capture(false, None, false);
        health.set_cycle_state(CycleState::Unavailable);
        health.cycle_finished();
        health.record_poll();
        let snapshot = health.snapshot();
        assert_eq!(snapshot.last_capture_success, Some(false));
        assert!(!snapshot.camera_available);
        assert_eq!(snapshot.cycle_state, CycleState::Unavailable);
        assert_eq!((snapshot.cycles_started, snapshot.cycles_completed), (1, 1));
        assert!(snapshot.last_successful_poll.is_some());
    }

    #[test]
    fn degraded_when_capture_failed() {
        let config = AgentConfig::from_json(
            r#"{"server_url": "http://127.0.0.1:9", "camera_id": "area"}"#,
        )
        .unwrap();
        let health = Arc::new(AgentHealth::new());
        let client = Arc::new(TransportClient::new(&config, Shutdown::new()));
        let reporter = StatusReporter::new(&config, client, health.clone());

        let payload = reporter.build_payload(0);
        assert_eq!(payload.status, "online");
        assert_eq!(payload.camera_role, "parking_monitor");
        assert_eq!(payload.camera_type, "auto");

        health.record_capture(false, None, false);
        let payload = reporter.build_payload(2);
        assert_eq!(payload.status, "degraded");
        assert!(!payload.camera_available);
        assert_eq!(payload.dropped_reports, 2);
    }

    #[test]
    fn heartbeat_carries_camera_stats_areas_and_system() {
        let config = AgentConfig::from_json(
            r#"{"server_url": "http://127.0.0.1:9", "camera_id": "area"}"#,
        )
        .unwrap();
        let health = Arc::new(AgentHealth::new());
        let client = Arc::new(TransportClient::new(&config, Shutdown::new()));
        let reporter = StatusReporter::new(&config, client, health.clone());

        health.record_camera_stats(&CameraStats {
            frames_captured: 5,
            capture_failures: 2,
            reopens: 1,
        });
        health.record_area(
            "north",
            AreaStatus::new(
                crate::transport::AreaOccupancy {
                    vehicle_count: 3,
                    available_slots: 7,
                    total_slots: 10,
                    occupancy_rate: 0.3,
                },
                Utc::now(),
            ),
        );

        let json = serde_json::to_value(reporter.build_payload(0)).unwrap();
        assert_eq!(json["frames_captured"], 5);
        assert_eq!(json["capture_failures"], 2);
        assert_eq!(json["camera_reopens"], 1);
        assert_eq!(json["parking_areas"]["north"]["available_slots"], 7);
        assert_eq!(json["parking_areas"]["north"]["status"], "available");
        assert!(json["system"]["memory_total"].as_u64().is_some());
        assert!(json["system"]["disk_percent"].as_f64().is_some());
    }
}
