use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use super::backoff::{BackoffPolicy, RetryBudget};
use super::payload::{
    parking_analysis_path, AreaCapturePayload, AreaOccupancy, CommandResult, DetectionResult,
    ServerAction, StatusPayload, TriggerPoll, CAMERA_STATUS_PATH, COMMAND_RESULT_PATH,
    DETECTION_RESULT_PATH,
};
use super::queue::PendingReports;
use crate::config::{AgentConfig, HttpSettings};
use crate::error::TransportError;
use crate::shutdown::Shutdown;

const MAX_ERROR_BODY: usize = 200;

/// Result of [`TransportClient::report`].
#[derive(Debug)]
pub enum ReportOutcome {
    /// The server accepted the report and answered with an action.
    Delivered(ServerAction),
    /// Retries were exhausted (or cancelled); the result waits in the pending queue.
    Queued {
        evicted: usize,
        error: TransportError,
    },
    /// The server refused the report (4xx). Not retried, not queued.
    Rejected(TransportError),
}

/// Result of one [`TransportClient::flush_one`] attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    /// Another activity is already flushing.
    Busy,
    Delivered { id: u64 },
    /// The server refused the queued entry; it was removed.
    Dropped { id: u64, status: u16 },
    /// Still unreachable; the entry stays at the head.
    Failed,
}

/// Blocking HTTP client for the parking server.
///
/// Shared by the poller, the heartbeat and the orchestrator; each calls it from its
/// own thread. The pending queue is the only mutable state and is internally locked.
pub struct TransportClient {
    agent: ureq::Agent,
    base_url: String,
    http: HttpSettings,
    policy: BackoffPolicy,
    report_attempts: u32,
    pending: PendingReports,
    flush_lock: Mutex<()>,
    shutdown: Shutdown,
}

impl TransportClient {
    pub fn new(config: &AgentConfig, shutdown: Shutdown) -> Self {
        let connect_timeout = config
            .http
            .poll_timeout
            .min(config.http.report_timeout)
            .min(config.http.status_timeout);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .user_agent(concat!("parkcam-agent/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            http: config.http.clone(),
            policy: BackoffPolicy::from_settings(&config.retry),
            report_attempts: config.retry.report_attempts.max(1),
            pending: PendingReports::new(config.queue.capacity, config.queue.max_age),
            flush_lock: Mutex::new(()),
            shutdown,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn pending(&self) -> &PendingReports {
        &self.pending
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Single POST attempt. Returns the response body.
    pub fn send<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let body = encode(payload)?;
        self.send_raw(path, &body, timeout)
    }

    fn send_raw(&self, path: &str, body: &str, timeout: Duration) -> Result<String, TransportError> {
        let response = self
            .agent
            .post(&self.url(path))
            .timeout(timeout)
            .set("Content-Type", "application/json")
            .send_string(body)
            .map_err(classify)?;
        response
            .into_string()
            .map_err(|err| TransportError::Transient(format!("read response: {}", err)))
    }

    /// Single GET attempt. Returns the response body.
    pub fn poll(&self, path: &str) -> Result<String, TransportError> {
        let response = self
            .agent
            .get(&self.url(path))
            .timeout(self.http.poll_timeout)
            .call()
            .map_err(classify)?;
        response
            .into_string()
            .map_err(|err| TransportError::Transient(format!("read response: {}", err)))
    }

    /// POST with the shared backoff policy.
    ///
    /// Only transient failures are retried. Waiting between attempts observes the
    /// shutdown signal; an attempt already in flight always runs to completion.
    pub fn send_with_retry<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
        timeout: Duration,
        budget: RetryBudget,
    ) -> Result<String, TransportError> {
        let body = encode(payload)?;
        let mut backoff = self.policy.start(budget);
        loop {
            let err = match self.send_raw(path, &body, timeout) {
                Ok(response) => return Ok(response),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };
            let Some(delay) = backoff.next_delay() else {
                log::warn!(
                    "POST {} failed after {} attempts: {}",
                    path,
                    backoff.failures(),
                    err
                );
                return Err(err);
            };
            log::debug!(
                "POST {} attempt {} failed ({}), retrying in {:?}",
                path,
                backoff.failures(),
                err,
                delay
            );
            if self.shutdown.wait_timeout(delay) {
                log::info!("POST {} retries stopped by shutdown: {}", path, err);
                return Err(TransportError::Cancelled);
            }
        }
    }

    /// Ask the server whether a capture is requested.
    pub fn poll_trigger(&self, path: &str) -> Result<TriggerPoll, TransportError> {
        let body = self.poll(path)?;
        let poll = TriggerPoll::parse(&body).map_err(TransportError::Decode)?;
        self.flush_one();
        Ok(poll)
    }

    /// Deliver a detection result, queueing it when the server stays unreachable.
    pub fn report(&self, result: DetectionResult) -> ReportOutcome {
        let payload = result.to_payload();
        match self.send_with_retry(
            DETECTION_RESULT_PATH,
            &payload,
            self.http.report_timeout,
            RetryBudget::Bounded(self.report_attempts),
        ) {
            Ok(body) => {
                let action = ServerAction::from_response_body(&body);
                self.flush_one();
                ReportOutcome::Delivered(action)
            }
            Err(error @ (TransportError::Transient(_) | TransportError::Cancelled)) => {
                let evicted = self.pending.push(result);
                log::warn!(
                    "report queued ({} pending): {}",
                    self.pending.len(),
                    error
                );
                ReportOutcome::Queued { evicted, error }
            }
            Err(error) => ReportOutcome::Rejected(error),
        }
    }

    /// Send one heartbeat. Not retried; the next interval sends a fresh one.
    ///
    /// Returns the response body, which may carry server commands.
    pub fn send_status(&self, status: &StatusPayload) -> Result<String, TransportError> {
        let body = self.send(CAMERA_STATUS_PATH, status, self.http.status_timeout)?;
        self.flush_one();
        Ok(body)
    }

    /// Upload an area capture and return the server's occupancy analysis.
    ///
    /// Retried up to `attempts` times; a failed upload is not queued since the next
    /// scheduled capture supersedes it.
    pub fn analyze_area(
        &self,
        payload: &AreaCapturePayload,
        attempts: u32,
    ) -> Result<AreaOccupancy, TransportError> {
        let body = self.send_with_retry(
            &parking_analysis_path(&payload.area_id),
            payload,
            self.http.report_timeout,
            RetryBudget::Bounded(attempts.max(1)),
        )?;
        AreaOccupancy::parse(&body).map_err(TransportError::Decode)
    }

    /// Report the outcome of a server command. Single attempt.
    pub fn send_command_result(&self, result: &CommandResult) -> Result<(), TransportError> {
        self.send(COMMAND_RESULT_PATH, result, self.http.status_timeout)?;
        log::debug!("command result sent for {}", result.command_id);
        Ok(())
    }

    /// One delivery attempt for the oldest queued report.
    ///
    /// The entry is removed only after the server has answered, so order is kept even
    /// when the attempt fails.
    pub fn flush_one(&self) -> FlushOutcome {
        let _guard = match self.flush_lock.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => return FlushOutcome::Busy,
        };
        let Some(entry) = self.pending.peek_front() else {
            return FlushOutcome::Empty;
        };

        match self.send(
            DETECTION_RESULT_PATH,
            &entry.result.to_payload(),
            self.http.report_timeout,
        ) {
            Ok(body) => {
                self.pending.remove_front_if(entry.id);
                log::info!(
                    "delivered queued report from {} (plate {:?}), server action {:?} not applied",
                    entry.result.timestamp,
                    entry.result.plate,
                    ServerAction::from_response_body(&body)
                );
                FlushOutcome::Delivered { id: entry.id }
            }
            Err(TransportError::Permanent { status, body }) => {
                self.pending.remove_front_if(entry.id);
                log::error!(
                    "server rejected queued report with {} ({}), dropping it",
                    status,
                    body
                );
                FlushOutcome::Dropped {
                    id: entry.id,
                    status,
                }
            }
            Err(err) => {
                log::debug!("queued report still undeliverable: {}", err);
                FlushOutcome::Failed
            }
        }
    }
}

fn encode<T: Serialize>(payload: &T) -> Result<String, TransportError> {
    serde_json::to_string(payload).map_err(|err| TransportError::Decode(err.to_string()))
}

/// 4xx is permanent; 5xx and everything below HTTP is transient.
fn classify(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Status(status, response) if (400..500).contains(&status) => {
            let body = response
                .into_string()
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY)
                .collect();
            TransportError::Permanent { status, body }
        }
        ureq::Error::Status(status, _) => {
            TransportError::Transient(format!("server returned {}", status))
        }
        ureq::Error::Transport(transport) => TransportError::Transient(transport.to_string()),
    }
}
