//! parkcam_agent - parking camera edge agent
//!
//! Polls the parking server for capture triggers, captures a frame, runs plate
//! detection and reports the result, while sending periodic heartbeats.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use parkcam_agent::{config::DEFAULT_CONFIG_PATH, Agent, AgentConfig, Shutdown};

#[derive(Parser, Debug)]
#[command(author, version, about = "Parking camera edge agent")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "PARKCAM_CONFIG", default_value = DEFAULT_CONFIG_PATH, value_name = "PATH")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = AgentConfig::load(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cfg.log_level))
        .init();
    for warning in cfg.warnings() {
        log::warn!("{}", warning);
    }
    log::info!(
        "parkcam_agent {} starting: camera {} ({}), camera type {}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera_id,
        cfg.role,
        cfg.camera_type.as_str()
    );

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        signal.trigger();
    })
    .context("install signal handler")?;

    let handle = Agent::new(cfg)?.spawn(shutdown)?;
    handle.join()?;
    log::info!("parkcam_agent stopped");
    Ok(())
}
