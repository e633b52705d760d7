//! Parking camera edge agent.
//!
//! Bridges a local camera with a remote parking-control server over HTTP:
//!
//! - `trigger`: polls the role's trigger endpoint and hands accepted triggers over
//! - `area`: schedules parking-area captures for the `area` role
//! - `orchestrator`: runs capture cycles, one at a time
//! - `camera`: capture backends (Pi camera, USB) with auto-selection and fallback
//! - `detect`: plate detector seam with a timeout-enforcing runner
//! - `transport`: HTTP client, shared backoff policy and the pending report queue
//! - `status`: health record and periodic heartbeat
//! - `command`: commands the server returns with a heartbeat
//! - `system`: host metrics for the heartbeat
//! - `relay`: local side effect of the server's decision (log or GPIO gate)
//!
//! `Agent` builds these from an `AgentConfig` and runs the poller (or area monitor),
//! the heartbeat and the orchestrator on their own threads sharing one `Shutdown`
//! signal.

pub mod agent;
pub mod area;
pub mod camera;
pub mod command;
pub mod config;
pub mod detect;
pub mod error;
pub mod orchestrator;
pub mod process;
pub mod relay;
pub mod shutdown;
pub mod status;
pub mod system;
pub mod transport;
pub mod trigger;

pub use agent::{Agent, AgentHandle};
pub use area::{AreaSchedule, AreaScanner};
pub use camera::{CameraBackend, CameraSource, CameraType};
pub use command::{CommandHandler, CommandRequest, ServerCommand};
pub use config::{AgentConfig, CameraRole};
pub use detect::{DetectorRunner, PlateDetector, PlateReading};
pub use error::{CameraError, DetectError, TransportError};
pub use orchestrator::{CaptureSlot, CycleOutcome, CycleState, Orchestrator};
pub use relay::{LogRelay, Relay, RelayHandle};
pub use shutdown::Shutdown;
pub use status::{AgentHealth, HealthSnapshot, StatusReporter};
pub use system::{SystemMetrics, SystemSampler};
pub use transport::{DetectionResult, PendingReports, ServerAction, TransportClient};
pub use trigger::{TriggerMailbox, TriggerPoller, TriggerSource, TriggerState, TriggerToken};
