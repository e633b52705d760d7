//! HTTP transport to the parking server.
//!
//! Blocking `ureq` requests with per-request timeouts, one shared retry policy and a
//! bounded queue for reports that could not be delivered.

pub mod backoff;
mod client;
pub mod payload;
pub mod queue;

pub use backoff::{Backoff, BackoffPolicy, RetryBudget};
pub use client::{FlushOutcome, ReportOutcome, TransportClient};
pub use payload::{
    parking_analysis_path, AreaCapturePayload, AreaOccupancy, AreaStatus, CommandResult,
    CommandStatus, DetectionPayload, DetectionResult, ServerAction, StatusPayload, TriggerPoll,
    CAMERA_STATUS_PATH, COMMAND_RESULT_PATH, DETECTION_RESULT_PATH,
};
pub use queue::{PendingEntry, PendingReports};
