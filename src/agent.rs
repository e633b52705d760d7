//! Wires the components together and runs the activities on their own threads.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};

use crate::area::AreaScanner;
use crate::camera::CameraSource;
use crate::command::CommandHandler;
use crate::config::{AgentConfig, CameraRole};
use crate::detect::{build_detector, DetectorRunner};
use crate::orchestrator::Orchestrator;
use crate::relay::{build_relay, RelayHandle};
use crate::shutdown::Shutdown;
use crate::status::{AgentHealth, StatusReporter};
use crate::transport::TransportClient;
use crate::trigger::{TriggerMailbox, TriggerPoller, TriggerState};

/// A fully built agent, not yet running.
pub struct Agent {
    config: AgentConfig,
    camera: CameraSource,
    detector: DetectorRunner,
    relay: RelayHandle,
}

impl Agent {
    /// Build every component. Nothing touches the camera or the network yet.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let camera = CameraSource::from_settings(config.camera_type, &config.camera);
        let detector = build_detector(&config.detection).context("build detector")?;
        let detector =
            DetectorRunner::spawn(detector, config.detection.timeout).context("start detector")?;
        let relay = RelayHandle::new(build_relay(&config.relay).context("build relay")?);
        Ok(Self {
            config,
            camera,
            detector,
            relay,
        })
    }

    /// Start the trigger poller or area monitor, the heartbeat and the orchestrator.
    pub fn spawn(self, shutdown: Shutdown) -> Result<AgentHandle> {
        let Agent {
            config,
            camera,
            detector,
            relay,
        } = self;
        let client = Arc::new(TransportClient::new(&config, shutdown.clone()));
        let health = Arc::new(AgentHealth::new());
        let mailbox = Arc::new(TriggerMailbox::new());
        let mut threads = Vec::new();

        match config.role.trigger_path() {
            Some(path) if config.polling.enabled => {
                let poller = TriggerPoller::new(
                    path,
                    TriggerState::new(config.role.clone(), config.polling.cooldown),
                    config.polling.interval,
                    client.clone(),
                    mailbox.clone(),
                    health.clone(),
                );
                let signal = shutdown.clone();
                threads.push(
                    std::thread::Builder::new()
                        .name("trigger-poller".to_string())
                        .spawn(move || poller.run(signal))
                        .context("spawn trigger poller")?,
                );
            }
            Some(_) => log::info!("trigger polling disabled by configuration"),
            None if config.role == CameraRole::Area && config.area.enabled => {
                let scanner = AreaScanner::new(&config.area, config.role.clone(), mailbox.clone());
                let signal = shutdown.clone();
                threads.push(
                    std::thread::Builder::new()
                        .name("area-monitor".to_string())
                        .spawn(move || scanner.run(signal))
                        .context("spawn area monitor")?,
                );
            }
            None => log::info!(
                "role {} has no trigger endpoint, running heartbeat only",
                config.role
            ),
        }

        let mut reporter = StatusReporter::new(&config, client.clone(), health.clone());
        if config.commands_enabled {
            reporter = reporter.with_commands(CommandHandler::new(
                &config,
                client.clone(),
                mailbox.clone(),
                relay.clone(),
            ));
        }
        let signal = shutdown.clone();
        threads.push(
            std::thread::Builder::new()
                .name("status-reporter".to_string())
                .spawn(move || reporter.run(signal))
                .context("spawn status reporter")?,
        );

        let orchestrator = Orchestrator::new(
            &config.camera_id,
            camera,
            detector,
            client.clone(),
            relay,
            mailbox.clone(),
            health.clone(),
        )
        .with_area_attempts(config.area.attempts);
        let signal = shutdown.clone();
        threads.push(
            std::thread::Builder::new()
                .name("orchestrator".to_string())
                .spawn(move || orchestrator.run(signal))
                .context("spawn orchestrator")?,
        );

        log::info!(
            "agent {} ({}) running against {}",
            config.camera_id,
            config.role,
            config.server_url
        );
        Ok(AgentHandle {
            shutdown,
            client,
            health,
            mailbox,
            threads,
        })
    }
}

pub struct AgentHandle {
    shutdown: Shutdown,
    client: Arc<TransportClient>,
    health: Arc<AgentHealth>,
    mailbox: Arc<TriggerMailbox>,
    threads: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn health(&self) -> &AgentHealth {
        &self.health
    }

    pub fn client(&self) -> &TransportClient {
        &self.client
    }

    /// Block until every activity has exited. Returns after shutdown is raised elsewhere.
    pub fn join(mut self) -> Result<()> {
        self.join_all()
    }

    /// Raise the shutdown signal and wait for the activities to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.trigger();
        self.mailbox.notify();
        self.join_all()
    }

    fn join_all(&mut self) -> Result<()> {
        let mut panicked = Vec::new();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("agent").to_string();
            if handle.join().is_err() {
                panicked.push(name);
            }
        }
        if panicked.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("agent threads panicked: {}", panicked.join(", ")))
        }
    }
}
