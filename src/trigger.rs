//! Trigger polling and hand-off to the orchestrator.
//!
//! `TriggerState` belongs to the poller alone. Accepted triggers become
//! `TriggerToken`s, passed through a single-slot `TriggerMailbox`; the orchestrator
//! consumes a token and acquires the capture slot in one step. Area scans and
//! server commands that need the camera go through the same mailbox.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::CameraRole;
use crate::error::TransportError;
use crate::orchestrator::{CaptureSlot, SlotGuard};
use crate::shutdown::Shutdown;
use crate::status::AgentHealth;
use crate::transport::{RetryBudget, TransportClient, TriggerPoll};

/// What a token asks the orchestrator to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    /// Trigger poll: capture, detect and report.
    Server,
    /// Scheduled parking-area capture.
    AreaScan { area_id: String },
    /// `capture_now` command. With an area it runs as an area scan.
    CaptureCommand {
        command_id: String,
        area_id: Option<String>,
    },
    /// `restart_camera` command.
    RestartCommand { command_id: String },
}

impl TriggerSource {
    pub fn command_id(&self) -> Option<&str> {
        match self {
            TriggerSource::CaptureCommand { command_id, .. }
            | TriggerSource::RestartCommand { command_id } => Some(command_id),
            TriggerSource::Server | TriggerSource::AreaScan { .. } => None,
        }
    }
}

/// One accepted trigger event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerToken {
    /// Sequence number, strictly increasing per producer.
    pub seq: u64,
    pub server_id: Option<String>,
    pub role: CameraRole,
    pub seen_at: DateTime<Utc>,
    pub source: TriggerSource,
}

impl TriggerToken {
    /// Token for work that did not come from the trigger poller.
    pub fn local(seq: u64, role: CameraRole, source: TriggerSource) -> Self {
        Self {
            seq,
            server_id: None,
            role,
            seen_at: Utc::now(),
            source,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerPhase {
    Idle,
    Polling,
    TriggerSeen,
}

/// Why a reported trigger was not dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ignored {
    /// Same server token as the last accepted trigger.
    Duplicate,
    /// A token is still waiting for the orchestrator; that capture covers this one.
    Pending,
    CoolingDown,
}

#[derive(Debug)]
pub struct TriggerState {
    role: CameraRole,
    phase: TriggerPhase,
    next_seq: u64,
    last_server_id: Option<String>,
    last_accepted_at: Option<Instant>,
    last_seen_at: Option<DateTime<Utc>>,
    cooldown: Duration,
}

impl TriggerState {
    pub fn new(role: CameraRole, cooldown: Duration) -> Self {
        Self {
            role,
            phase: TriggerPhase::Idle,
            next_seq: 1,
            last_server_id: None,
            last_accepted_at: None,
            last_seen_at: None,
            cooldown,
        }
    }

    pub fn phase(&self) -> TriggerPhase {
        self.phase
    }

    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen_at
    }

    pub fn begin_poll(&mut self) {
        self.phase = TriggerPhase::Polling;
    }

    /// A failed poll neither creates nor loses a trigger.
    pub fn poll_failed(&mut self) {
        self.phase = TriggerPhase::Idle;
    }

    /// Apply a poll response. Returns a token when the trigger should be dispatched.
    ///
    /// `pending` tells whether the previous token is still waiting to be consumed.
    pub fn observe(
        &mut self,
        poll: &TriggerPoll,
        pending: bool,
    ) -> Result<Option<TriggerToken>, Ignored> {
        if !poll.present {
            self.phase = TriggerPhase::Idle;
            return Ok(None);
        }
        let now = Utc::now();
        self.last_seen_at = Some(now);

        let ignored = match &poll.server_id {
            Some(id) if self.last_server_id.as_deref() == Some(id.as_str()) => {
                Some(Ignored::Duplicate)
            }
            // Not recorded: the next poll after the mailbox drains dispatches it.
            _ if pending => Some(Ignored::Pending),
            Some(_) => None,
            None => self
                .last_accepted_at
                .filter(|at| at.elapsed() < self.cooldown)
                .map(|_| Ignored::CoolingDown),
        };
        if let Some(reason) = ignored {
            self.phase = TriggerPhase::Idle;
            return Err(reason);
        }

        self.phase = TriggerPhase::TriggerSeen;
        self.last_server_id = poll.server_id.clone().or(self.last_server_id.take());
        self.last_accepted_at = Some(Instant::now());
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(Some(TriggerToken {
            seq,
            server_id: poll.server_id.clone(),
            role: self.role.clone(),
            seen_at: now,
            source: TriggerSource::Server,
        }))
    }

    /// The token was handed to the orchestrator.
    pub fn dispatched(&mut self) {
        self.phase = TriggerPhase::Idle;
    }

    /// The mailbox filled up before the token could be offered. Forget it so the
    /// trigger is dispatched again on a later poll.
    pub fn refused(&mut self, token: &TriggerToken) {
        if token.server_id.is_some() && self.last_server_id == token.server_id {
            self.last_server_id = None;
        }
        self.last_accepted_at = None;
        self.phase = TriggerPhase::Idle;
    }
}

/// Single-slot hand-off between the poller and the orchestrator.
#[derive(Default)]
pub struct TriggerMailbox {
    pending: Mutex<Option<TriggerToken>>,
    cond: Condvar,
}

impl TriggerMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<TriggerToken>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a token unless one is already waiting. Returns false if it was refused.
    pub fn offer(&self, token: TriggerToken) -> bool {
        let mut pending = self.lock();
        if pending.is_some() {
            return false;
        }
        *pending = Some(token);
        self.cond.notify_all();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Consume the pending token and acquire the capture slot as one step.
    ///
    /// If the slot is busy the token stays in the mailbox.
    pub fn take_with_slot(&self, slot: &Arc<CaptureSlot>) -> Option<(TriggerToken, SlotGuard)> {
        let mut pending = self.lock();
        Self::take_locked(&mut pending, slot)
    }

    /// Like [`take_with_slot`](Self::take_with_slot), waiting up to `timeout` for a token.
    pub fn wait_take(
        &self,
        slot: &Arc<CaptureSlot>,
        timeout: Duration,
    ) -> Option<(TriggerToken, SlotGuard)> {
        let mut pending = self.lock();
        if pending.is_none() {
            pending = match self.cond.wait_timeout_while(pending, timeout, |p| p.is_none()) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Self::take_locked(&mut pending, slot)
    }

    fn take_locked(
        pending: &mut Option<TriggerToken>,
        slot: &Arc<CaptureSlot>,
    ) -> Option<(TriggerToken, SlotGuard)> {
        pending.as_ref()?;
        let guard = slot.try_acquire()?;
        pending.take().map(|token| (token, guard))
    }

    /// Wake any waiter, e.g. on shutdown.
    pub fn notify(&self) {
        self.cond.notify_all();
    }
}

/// Polls the role's trigger endpoint and hands accepted triggers to the mailbox.
pub struct TriggerPoller {
    path: &'static str,
    client: Arc<TransportClient>,
    mailbox: Arc<TriggerMailbox>,
    health: Arc<AgentHealth>,
    state: TriggerState,
    interval: Duration,
}

impl TriggerPoller {
    pub fn new(
        path: &'static str,
        state: TriggerState,
        interval: Duration,
        client: Arc<TransportClient>,
        mailbox: Arc<TriggerMailbox>,
        health: Arc<AgentHealth>,
    ) -> Self {
        Self {
            path,
            client,
            mailbox,
            health,
            state,
            interval,
        }
    }

    /// One poll. Returns the sequence number of a dispatched trigger.
    pub fn poll_once(&mut self) -> Result<Option<u64>, TransportError> {
        self.state.begin_poll();
        let poll = match self.client.poll_trigger(self.path) {
            Ok(poll) => poll,
            Err(err) => {
                self.state.poll_failed();
                return Err(err);
            }
        };
        self.health.record_poll();

        match self.state.observe(&poll, self.mailbox.is_pending()) {
            Ok(Some(token)) => {
                let seq = token.seq;
                log::info!(
                    "trigger #{} for {} (server id {:?})",
                    seq,
                    token.role,
                    token.server_id
                );
                let refused = token.clone();
                if self.mailbox.offer(token) {
                    self.state.dispatched();
                    Ok(Some(seq))
                } else {
                    log::debug!("mailbox busy, trigger #{} deferred", seq);
                    self.state.refused(&refused);
                    Ok(None)
                }
            }
            Ok(None) => Ok(None),
            Err(reason) => {
                log::debug!("trigger ignored: {:?}", reason);
                Ok(None)
            }
        }
    }

    /// Poll until shutdown. Failures back off with the shared policy, never faster
    /// than the normal interval.
    pub fn run(mut self, shutdown: Shutdown) {
        log::info!(
            "trigger poller started on {} every {:?}",
            self.path,
            self.interval
        );
        let mut backoff = self.client.policy().start(RetryBudget::Unbounded);
        loop {
            let wait = match self.poll_once() {
                Ok(_) => {
                    if backoff.failures() > 0 {
                        log::info!("trigger polling recovered after {} failures", backoff.failures());
                    }
                    backoff.reset();
                    self.interval
                }
                Err(err) => {
                    let delay = backoff.next_delay().unwrap_or(self.interval);
                    if backoff.failures() == 1 {
                        log::warn!("trigger poll failed: {}", err);
                    } else {
                        log::debug!("trigger poll failed ({} in a row): {}", backoff.failures(), err);
                    }
                    delay.max(self.interval)
                }
            };
            if shutdown.wait_timeout(wait) {
                break;
            }
        }
        self.mailbox.notify();
        log::info!("trigger poller stopped");
    }
}
