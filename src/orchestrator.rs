//! Capture cycle state machine.
//!
//! `Idle -> Capturing -> Detecting -> Reporting -> Idle`, plus `Unavailable` while the
//! camera cannot be reached. Area scans skip `Detecting`. Each step failure still ends
//! the cycle in a resting state (`Idle` or `Unavailable`) with the capture slot
//! released.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::area::{FrameChangeTracker, FrameDigest};
use crate::camera::{CameraSource, ImageBytes};
use crate::detect::DetectorRunner;
use crate::relay::RelayHandle;
use crate::shutdown::Shutdown;
use crate::status::AgentHealth;
use crate::transport::{
    AreaCapturePayload, AreaOccupancy, AreaStatus, CommandResult, DetectionResult, ReportOutcome,
    ServerAction, TransportClient,
};
use crate::trigger::{TriggerMailbox, TriggerSource, TriggerToken};

/// How long the orchestrator waits for a token before rechecking shutdown.
const TAKE_WAIT: Duration = Duration::from_millis(250);
const DEFAULT_AREA_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Capturing,
    Detecting,
    Reporting,
    Unavailable,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CycleState::Idle => "idle",
            CycleState::Capturing => "capturing",
            CycleState::Detecting => "detecting",
            CycleState::Reporting => "reporting",
            CycleState::Unavailable => "unavailable",
        };
        f.write_str(label)
    }
}

/// Binary exclusion token: at most one cycle holds it.
#[derive(Debug, Default)]
pub struct CaptureSlot {
    held: AtomicBool,
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard { slot: self.clone() })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the capture slot when dropped.
#[derive(Debug)]
pub struct SlotGuard {
    slot: Arc<CaptureSlot>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.held.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// No frame; nothing was reported.
    CaptureFailed,
    Delivered(ServerAction),
    Queued,
    Rejected,
    Analysed(AreaOccupancy),
    /// Same frame as the last analysed one; nothing was uploaded.
    Unchanged,
    AnalysisFailed,
    Restarted(&'static str),
    RestartFailed(String),
}

impl CycleOutcome {
    /// Result posted for a command that ran as a cycle.
    pub fn command_result(&self, command_id: &str) -> CommandResult {
        match self {
            CycleOutcome::CaptureFailed => CommandResult::error(command_id, "failed to capture image"),
            CycleOutcome::Delivered(action) => CommandResult::success(
                command_id,
                format!("image captured and reported, server action {:?}", action),
            ),
            CycleOutcome::Queued => {
                CommandResult::success(command_id, "image captured, report queued for delivery")
            }
            CycleOutcome::Rejected => {
                CommandResult::error(command_id, "image captured, server rejected the report")
            }
            CycleOutcome::Analysed(occupancy) => {
                let result = CommandResult::success(
                    command_id,
                    format!(
                        "area analysed: {}/{} slots available",
                        occupancy.available_slots, occupancy.total_slots
                    ),
                );
                match serde_json::to_value(occupancy) {
                    Ok(data) => result.with_data(data),
                    Err(_) => result,
                }
            }
            CycleOutcome::Unchanged => CommandResult::success(command_id, "area unchanged"),
            CycleOutcome::AnalysisFailed => {
                CommandResult::error(command_id, "image captured, parking analysis failed")
            }
            CycleOutcome::Restarted(backend) => {
                CommandResult::success(command_id, format!("camera restarted on {} backend", backend))
            }
            CycleOutcome::RestartFailed(reason) => {
                CommandResult::error(command_id, format!("camera restart failed: {}", reason))
            }
        }
    }
}

pub struct Orchestrator {
    camera_id: String,
    camera: CameraSource,
    detector: DetectorRunner,
    client: Arc<TransportClient>,
    relay: RelayHandle,
    mailbox: Arc<TriggerMailbox>,
    health: Arc<AgentHealth>,
    slot: Arc<CaptureSlot>,
    state: CycleState,
    frames: FrameChangeTracker,
    area_attempts: u32,
}

impl Orchestrator {
    pub fn new(
        camera_id: &str,
        camera: CameraSource,
        detector: DetectorRunner,
        client: Arc<TransportClient>,
        relay: RelayHandle,
        mailbox: Arc<TriggerMailbox>,
        health: Arc<AgentHealth>,
    ) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            camera,
            detector,
            client,
            relay,
            mailbox,
            health,
            slot: Arc::new(CaptureSlot::new()),
            state: CycleState::Idle,
            frames: FrameChangeTracker::new(),
            area_attempts: DEFAULT_AREA_ATTEMPTS,
        }
    }

    /// Upload attempts for each area capture.
    pub fn with_area_attempts(mut self, attempts: u32) -> Self {
        self.area_attempts = attempts.max(1);
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn slot(&self) -> Arc<CaptureSlot> {
        self.slot.clone()
    }

    fn set_state(&mut self, next: CycleState) {
        if self.state != next {
            log::debug!("cycle: {} -> {}", self.state, next);
        }
        self.state = next;
        self.health.set_cycle_state(next);
    }

    /// Run one cycle for `token`. The slot is released on return.
    pub fn run_cycle(&mut self, token: TriggerToken, slot: SlotGuard) -> CycleOutcome {
        let _slot = slot;
        self.health.cycle_started();
        let outcome = match &token.source {
            TriggerSource::Server | TriggerSource::CaptureCommand { area_id: None, .. } => {
                self.detection_steps(&token)
            }
            TriggerSource::AreaScan { area_id } => self.area_steps(&token, area_id, true),
            TriggerSource::CaptureCommand {
                area_id: Some(area_id),
                ..
            } => self.area_steps(&token, area_id, false),
            TriggerSource::RestartCommand { .. } => self.restart_camera(),
        };
        self.health.record_camera_stats(self.camera.stats());
        self.health.cycle_finished();
        log::info!(
            "trigger #{} finished: {:?} (state {})",
            token.seq,
            outcome,
            self.state
        );
        if let Some(command_id) = token.source.command_id() {
            let result = outcome.command_result(command_id);
            if let Err(err) = self.client.send_command_result(&result) {
                log::warn!("command {}: result not delivered: {}", command_id, err);
            }
        }
        outcome
    }

    /// Capturing step shared by every capture cycle. The timestamp is taken as soon
    /// as the frame is in hand.
    fn capture(&mut self, token: &TriggerToken) -> Option<(ImageBytes, DateTime<Utc>)> {
        self.set_state(CycleState::Capturing);
        match self.camera.acquire_frame() {
            Ok(image) => {
                let captured_at = Utc::now();
                self.health
                    .record_capture(true, self.camera.active_backend(), true);
                Some((image, captured_at))
            }
            Err(err) => {
                let available = !err.is_hardware_unavailable();
                self.health.record_capture(false, None, available);
                if available {
                    log::warn!("trigger #{}: capture failed: {}", token.seq, err);
                    self.set_state(CycleState::Idle);
                } else {
                    log::error!("trigger #{}: camera unavailable: {}", token.seq, err);
                    self.set_state(CycleState::Unavailable);
                }
                None
            }
        }
    }

    fn detection_steps(&mut self, token: &TriggerToken) -> CycleOutcome {
        let Some((image, captured_at)) = self.capture(token) else {
            return CycleOutcome::CaptureFailed;
        };

        self.set_state(CycleState::Detecting);
        let reading = match self.detector.detect(&image) {
            Ok(reading) => reading,
            Err(err) => {
                log::warn!(
                    "trigger #{}: {} detector: {}; reporting empty result",
                    token.seq,
                    self.detector.name(),
                    err
                );
                None
            }
        };

        self.set_state(CycleState::Reporting);
        let result = DetectionResult::new(&self.camera_id, reading, image, captured_at);
        log::info!(
            "trigger #{}: reporting plate {:?} ({:.2})",
            token.seq,
            result.plate,
            result.confidence
        );
        let outcome = match self.client.report(result) {
            ReportOutcome::Delivered(action) => {
                if let Err(err) = self.relay.apply(&action) {
                    log::warn!("{} relay failed for {:?}: {:#}", self.relay.name(), action, err);
                }
                CycleOutcome::Delivered(action)
            }
            ReportOutcome::Queued { evicted, error } => {
                log::warn!(
                    "trigger #{}: report queued after {} ({} evicted)",
                    token.seq,
                    error,
                    evicted
                );
                CycleOutcome::Queued
            }
            ReportOutcome::Rejected(err) => {
                log::error!(
                    "trigger #{}: report rejected, check server integration: {}",
                    token.seq,
                    err
                );
                CycleOutcome::Rejected
            }
        };
        self.set_state(CycleState::Idle);
        outcome
    }

    /// Capture an area and upload it for occupancy analysis.
    ///
    /// Scheduled scans skip the upload when the frame is identical to the last one
    /// the server analysed.
    fn area_steps(&mut self, token: &TriggerToken, area_id: &str, skip_unchanged: bool) -> CycleOutcome {
        let Some((image, captured_at)) = self.capture(token) else {
            return CycleOutcome::CaptureFailed;
        };
        let digest = FrameDigest::of(&image);
        if skip_unchanged && !self.frames.has_changed(area_id, &digest) {
            log::debug!("area {}: frame unchanged, skipping analysis", area_id);
            self.set_state(CycleState::Idle);
            return CycleOutcome::Unchanged;
        }

        self.set_state(CycleState::Reporting);
        let payload = AreaCapturePayload::new(&self.camera_id, area_id, &image, captured_at);
        let outcome = match self.client.analyze_area(&payload, self.area_attempts) {
            Ok(occupancy) => {
                self.frames.record(area_id, digest);
                log::info!(
                    "area {}: vehicles={}, available={}/{}, occupancy={:.1}%",
                    area_id,
                    occupancy.vehicle_count,
                    occupancy.available_slots,
                    occupancy.total_slots,
                    occupancy.occupancy_rate * 100.0
                );
                self.health
                    .record_area(area_id, AreaStatus::new(occupancy.clone(), Utc::now()));
                CycleOutcome::Analysed(occupancy)
            }
            Err(err) => {
                log::warn!("area {}: parking analysis failed: {}", area_id, err);
                CycleOutcome::AnalysisFailed
            }
        };
        self.set_state(CycleState::Idle);
        outcome
    }

    fn restart_camera(&mut self) -> CycleOutcome {
        self.set_state(CycleState::Capturing);
        match self.camera.restart() {
            Ok(backend) => {
                self.health.record_camera(Some(backend), true);
                self.set_state(CycleState::Idle);
                CycleOutcome::Restarted(backend)
            }
            Err(err) => {
                let available = !err.is_hardware_unavailable();
                self.health.record_camera(None, available);
                log::error!("camera restart failed: {}", err);
                self.set_state(if available {
                    CycleState::Idle
                } else {
                    CycleState::Unavailable
                });
                CycleOutcome::RestartFailed(err.to_string())
            }
        }
    }

    /// Consume triggers until shutdown. A cycle already running is finished first.
    pub fn run(mut self, shutdown: Shutdown) {
        log::info!("orchestrator started for {}", self.camera_id);
        while !shutdown.is_triggered() {
            let Some((token, slot)) = self.mailbox.wait_take(&self.slot, TAKE_WAIT) else {
                continue;
            };
            if shutdown.is_triggered() {
                log::info!("trigger #{} discarded, shutting down", token.seq);
                break;
            }
            self.run_cycle(token, slot);
        }
        self.camera.close();
        log::info!("orchestrator stopped");
    }
}
