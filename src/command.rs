//! Commands delivered in heartbeat responses.
//!
//! The server attaches a `commands` array to its answer for `/api/camera/status`.
//! Barrier and status commands run right away on the heartbeat thread. Commands that
//! need the camera become mailbox tokens, and the orchestrator posts their result
//! once the cycle is done.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::{is_valid_identifier, AgentConfig, CameraRole};
use crate::relay::RelayHandle;
use crate::transport::{CommandResult, StatusPayload, TransportClient};
use crate::trigger::{TriggerMailbox, TriggerSource, TriggerToken};

/// Longest barrier opening a command may ask for.
const MAX_OPEN_DURATION: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Debug, PartialEq)]
pub enum ServerCommand {
    CaptureNow { area_id: Option<String> },
    RestartCamera,
    OpenBarrier {
        barrier: Option<String>,
        duration: Option<f64>,
    },
    CloseBarrier { barrier: Option<String> },
    GetStatus,
    /// Unknown or unsupported command name.
    Unsupported(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommandRequest {
    /// `unknown` when the server sent no id.
    pub id: String,
    pub command: ServerCommand,
}

impl CommandRequest {
    /// Commands carried by a heartbeat response. Anything unparseable yields none.
    pub fn from_status_body(body: &str) -> Vec<CommandRequest> {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
            return Vec::new();
        };
        match map.get("commands") {
            Some(Value::Array(entries)) => entries.iter().filter_map(Self::from_value).collect(),
            _ => Vec::new(),
        }
    }

    fn from_value(value: &Value) -> Option<CommandRequest> {
        let entry = value.as_object()?;
        let id = match entry.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(Value::Number(id)) => id.to_string(),
            _ => "unknown".to_string(),
        };
        let text = |key: &str| entry.get(key).and_then(Value::as_str).map(str::to_string);
        let name = text("command").unwrap_or_default();
        let command = match name.as_str() {
            "capture_now" => ServerCommand::CaptureNow {
                area_id: text("area_id"),
            },
            "restart_camera" => ServerCommand::RestartCamera,
            "open_barrier" => ServerCommand::OpenBarrier {
                barrier: text("barrier_type"),
                duration: entry.get("duration").and_then(Value::as_f64),
            },
            "close_barrier" => ServerCommand::CloseBarrier {
                barrier: text("barrier_type"),
            },
            "get_status" => ServerCommand::GetStatus,
            _ => ServerCommand::Unsupported(name),
        };
        Some(CommandRequest { id, command })
    }
}

/// Executes server commands for one camera.
pub struct CommandHandler {
    client: Arc<TransportClient>,
    mailbox: Arc<TriggerMailbox>,
    relay: RelayHandle,
    role: CameraRole,
    default_area: Option<String>,
    open_duration: Duration,
    next_seq: AtomicU64,
}

impl CommandHandler {
    pub fn new(
        config: &AgentConfig,
        client: Arc<TransportClient>,
        mailbox: Arc<TriggerMailbox>,
        relay: RelayHandle,
    ) -> Self {
        let default_area = (config.role == CameraRole::Area)
            .then(|| config.area.areas.first().cloned())
            .flatten();
        Self {
            client,
            mailbox,
            relay,
            role: config.role.clone(),
            default_area,
            open_duration: config.relay.open_duration,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Execute one command and post its result.
    ///
    /// Camera commands post their result from the orchestrator instead.
    pub fn handle(&self, request: &CommandRequest, status: &StatusPayload) {
        log::info!("server command {:?} (id {})", request.command, request.id);
        let Some(result) = self.execute(request, status) else {
            return;
        };
        if let Err(err) = self.client.send_command_result(&result) {
            log::warn!("command {}: result not delivered: {}", request.id, err);
        }
    }

    /// Run a command. Returns `None` when it was handed to the orchestrator.
    pub fn execute(&self, request: &CommandRequest, status: &StatusPayload) -> Option<CommandResult> {
        let id = request.id.as_str();
        let result = match &request.command {
            ServerCommand::CaptureNow { area_id } => {
                let area_id = match self.capture_area(area_id.as_deref()) {
                    Ok(area_id) => area_id,
                    Err(message) => return Some(CommandResult::error(id, message)),
                };
                let source = TriggerSource::CaptureCommand {
                    command_id: id.to_string(),
                    area_id,
                };
                return self.enqueue(id, source, "a capture is already pending");
            }
            ServerCommand::RestartCamera => {
                let source = TriggerSource::RestartCommand {
                    command_id: id.to_string(),
                };
                return self.enqueue(id, source, "camera is busy, retry later");
            }
            ServerCommand::OpenBarrier { barrier, duration } => {
                self.open_barrier(id, barrier.as_deref(), *duration)
            }
            ServerCommand::CloseBarrier { barrier } => match self.check_barrier(barrier.as_deref()) {
                Ok(name) => match self.relay.close_gate() {
                    Ok(()) => CommandResult::success(id, format!("{} barrier closed", name)),
                    Err(err) => CommandResult::error(id, format!("barrier operation failed: {:#}", err)),
                },
                Err(message) => CommandResult::error(id, message),
            },
            ServerCommand::GetStatus => match serde_json::to_value(status) {
                Ok(data) => CommandResult::success(id, "status retrieved").with_data(data),
                Err(err) => CommandResult::error(id, format!("status retrieval failed: {}", err)),
            },
            ServerCommand::Unsupported(name) => {
                CommandResult::error(id, format!("unknown command: {}", name))
            }
        };
        Some(result)
    }

    fn enqueue(&self, id: &str, source: TriggerSource, busy: &str) -> Option<CommandResult> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = TriggerToken::local(seq, self.role.clone(), source);
        if self.mailbox.offer(token) {
            None
        } else {
            Some(CommandResult::error(id, busy))
        }
    }

    /// Area cameras capture for an area; the others run a detection cycle.
    fn capture_area(&self, requested: Option<&str>) -> Result<Option<String>, String> {
        if self.role != CameraRole::Area {
            return Ok(None);
        }
        match requested {
            Some(area_id) if is_valid_identifier(area_id) => Ok(Some(area_id.to_string())),
            Some(area_id) => Err(format!("invalid area id '{}'", area_id)),
            None => Ok(self.default_area.clone()),
        }
    }

    /// Barrier commands only apply to the barrier this camera drives.
    fn check_barrier<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str, String> {
        let own = match self.role {
            CameraRole::Entrance | CameraRole::Exit => self.role.label(),
            _ => return Err(format!("no barrier is attached to the {} camera", self.role)),
        };
        match requested {
            None => Ok(own),
            Some(barrier) if barrier == own => Ok(own),
            Some(barrier) => Err(format!("{} barrier not controlled by this camera", barrier)),
        }
    }

    fn open_barrier(&self, id: &str, barrier: Option<&str>, duration: Option<f64>) -> CommandResult {
        let name = match self.check_barrier(barrier) {
            Ok(name) => name,
            Err(message) => return CommandResult::error(id, message),
        };
        let duration = match duration {
            None => self.open_duration,
            Some(secs) if secs > 0.0 && secs <= MAX_OPEN_DURATION.as_secs_f64() => {
                Duration::from_secs_f64(secs)
            }
            Some(secs) => return CommandResult::error(id, format!("invalid duration {}", secs)),
        };
        match self.relay.open_gate(duration) {
            Ok(()) => CommandResult::success(
                id,
                format!("{} barrier opened for {}s", name, duration.as_secs_f64()),
            ),
            Err(err) => CommandResult::error(id, format!("barrier operation failed: {:#}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::LogRelay;
    use crate::shutdown::Shutdown;
    use crate::transport::CommandStatus;
    use std::collections::BTreeMap;

    fn handler(camera_id: &str) -> (CommandHandler, Arc<TriggerMailbox>) {
        let config = AgentConfig::from_json(&format!(
            r#"{{"server_url": "http://127.0.0.1:9", "camera_id": "{}",
                "parking_monitor": {{"areas": ["north", "south"]}}}}"#,
            camera_id
        ))
        .unwrap();
        let client = Arc::new(TransportClient::new(&config, Shutdown::new()));
        let mailbox = Arc::new(TriggerMailbox::new());
        let handler = CommandHandler::new(
            &config,
            client,
            mailbox.clone(),
            RelayHandle::new(Box::new(LogRelay)),
        );
        (handler, mailbox)
    }

    fn status() -> StatusPayload {
        StatusPayload {
            camera_id: "entrance".into(),
            camera_role: "entrance".into(),
            status: "online".into(),
            camera_type: "usb".into(),
            camera_available: true,
            last_successful_poll: None,
            last_capture_success: None,
            pending_reports: 0,
            dropped_reports: 0,
            cycles_completed: 4,
            frames_captured: 4,
            capture_failures: 0,
            camera_reopens: 0,
            system: None,
            parking_areas: BTreeMap::new(),
            timestamp: "2026-01-01T00:00:00.000Z".into(),
        }
    }

    fn request(id: &str, command: ServerCommand) -> CommandRequest {
        CommandRequest {
            id: id.to_string(),
            command,
        }
    }

    #[test]
    fn parses_commands_from_status_response() {
        let body = r#"{"success": true, "commands": [
            {"command": "capture_now", "id": "c1"},
            {"command": "open_barrier", "id": 7, "barrier_type": "exit", "duration": 3},
            {"command": "update_config", "id": "c3"},
            {"id": "c4"},
            "garbage"
        ]}"#;
        let commands = CommandRequest::from_status_body(body);
        assert_eq!(
            commands,
            vec![
                request("c1", ServerCommand::CaptureNow { area_id: None }),
                request(
                    "7",
                    ServerCommand::OpenBarrier {
                        barrier: Some("exit".into()),
                        duration: Some(3.0)
                    }
                ),
                request("c3", ServerCommand::Unsupported("update_config".into())),
                request("c4", ServerCommand::Unsupported(String::new())),
            ]
        );
        assert!(CommandRequest::from_status_body("{}").is_empty());
        assert!(CommandRequest::from_status_body("not json").is_empty());
    }

    #[test]
    fn capture_now_becomes_a_mailbox_token() {
        let (handler, mailbox) = handler("entrance");
        let capture = request("c1", ServerCommand::CaptureNow { area_id: None });
        assert_eq!(handler.execute(&capture, &status()), None);
        assert!(mailbox.is_pending());

        // Only one capture may wait at a time.
        let result = handler.execute(&request("c2", ServerCommand::RestartCamera), &status());
        assert_eq!(result.unwrap().status, CommandStatus::Error);

        let slot = Arc::new(crate::orchestrator::CaptureSlot::new());
        let (token, _guard) = mailbox.take_with_slot(&slot).unwrap();
        assert_eq!(
            token.source,
            TriggerSource::CaptureCommand {
                command_id: "c1".into(),
                area_id: None
            }
        );
    }

    #[test]
    fn area_capture_defaults_to_first_area() {
        let (handler, mailbox) = handler("area");
        handler.execute(&request("c1", ServerCommand::CaptureNow { area_id: None }), &status());
        let slot = Arc::new(crate::orchestrator::CaptureSlot::new());
        let (token, _guard) = mailbox.take_with_slot(&slot).unwrap();
        assert_eq!(token.source.command_id(), Some("c1"));
        assert!(matches!(
            token.source,
            TriggerSource::CaptureCommand { area_id: Some(ref area), .. } if area == "north"
        ));

        let bad = request("c2", ServerCommand::CaptureNow { area_id: Some("../x".into()) });
        assert_eq!(handler.execute(&bad, &status()).unwrap().status, CommandStatus::Error);
    }

    #[test]
    fn barrier_commands_respect_the_camera_role() {
        let (handler, _) = handler("entrance");
        let open = handler
            .execute(
                &request(
                    "b1",
                    ServerCommand::OpenBarrier {
                        barrier: None,
                        duration: Some(2.0),
                    },
                ),
                &status(),
            )
            .unwrap();
        assert_eq!(open.status, CommandStatus::Success);
        assert_eq!(open.message, "entrance barrier opened for 2s");

        let other = handler
            .execute(
                &request(
                    "b2",
                    ServerCommand::CloseBarrier {
                        barrier: Some("exit".into()),
                    },
                ),
                &status(),
            )
            .unwrap();
        assert_eq!(other.status, CommandStatus::Error);

        let too_long = ServerCommand::OpenBarrier {
            barrier: None,
            duration: Some(86_400.0),
        };
        assert_eq!(
            handler.execute(&request("b3", too_long), &status()).unwrap().status,
            CommandStatus::Error
        );

        let (area, _) = self::handler("area");
        let close = ServerCommand::CloseBarrier { barrier: None };
        assert_eq!(
            area.execute(&request("b4", close), &status()).unwrap().status,
            CommandStatus::Error
        );
    }

    #[test]
    fn get_status_returns_the_heartbeat_and_unknown_is_an_error() {
        let (handler, _) = handler("exit");
        let result = handler
            .execute(&request("s1", ServerCommand::GetStatus), &status())
            .unwrap();
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.data.unwrap()["cycles_completed"], 4);

        let result = handler
            .execute(&request("u1", ServerCommand::Unsupported("reboot".into())), &status())
            .unwrap();
        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.message, "unknown command: reboot");
    }
}
