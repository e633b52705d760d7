//! Local side effects of server decisions.
//!
//! Delivery is best effort: a relay error is logged and the cycle carries on.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;

use crate::config::{RelayKind, RelaySettings};
use crate::transport::ServerAction;

/// Receives the action returned for a delivered detection report, and barrier
/// commands sent by the server.
pub trait Relay: Send {
    fn name(&self) -> &'static str;

    fn apply(&mut self, action: &ServerAction) -> Result<()>;

    /// Open the barrier for `duration`, then close it again.
    fn open_gate(&mut self, duration: Duration) -> Result<()>;

    /// Close the barrier now.
    fn close_gate(&mut self) -> Result<()>;
}

/// Relay shared by the orchestrator and the command handler.
#[derive(Clone)]
pub struct RelayHandle {
    name: &'static str,
    inner: Arc<Mutex<Box<dyn Relay>>>,
}

impl RelayHandle {
    pub fn new(relay: Box<dyn Relay>) -> Self {
        Self {
            name: relay.name(),
            inner: Arc::new(Mutex::new(relay)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Relay>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, action: &ServerAction) -> Result<()> {
        self.lock().apply(action)
    }

    pub fn open_gate(&self, duration: Duration) -> Result<()> {
        self.lock().open_gate(duration)
    }

    pub fn close_gate(&self) -> Result<()> {
        self.lock().close_gate()
    }
}

/// Logs decisions without touching hardware.
#[derive(Debug, Default)]
pub struct LogRelay;

impl Relay for LogRelay {
    fn name(&self) -> &'static str {
        "log"
    }

    fn apply(&mut self, action: &ServerAction) -> Result<()> {
        match action {
            ServerAction::Grant => log::info!("server granted access, gate would open"),
            ServerAction::Deny => log::info!("server denied access"),
            ServerAction::Ack => log::debug!("server acknowledged report"),
            ServerAction::Unknown(raw) => log::warn!("server returned unknown action {:?}", raw),
        }
        Ok(())
    }

    fn open_gate(&mut self, duration: Duration) -> Result<()> {
        log::info!("gate would open for {:?}", duration);
        Ok(())
    }

    fn close_gate(&mut self) -> Result<()> {
        log::info!("gate would close");
        Ok(())
    }
}

pub fn build_relay(settings: &RelaySettings) -> Result<Box<dyn Relay>> {
    match settings.backend {
        RelayKind::Log => Ok(Box::new(LogRelay)),
        #[cfg(feature = "relay-gpio")]
        RelayKind::Gpio => Ok(Box::new(gpio::GpioRelay::new(settings)?)),
        #[cfg(not(feature = "relay-gpio"))]
        RelayKind::Gpio => Err(anyhow::anyhow!(
            "relay.backend = gpio requires building with the relay-gpio feature"
        )),
    }
}

#[cfg(feature = "relay-gpio")]
pub use gpio::GpioRelay;

#[cfg(feature = "relay-gpio")]
mod gpio {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{Context, Result};
    use rppal::gpio::{Gpio, OutputPin};

    use super::Relay;
    use crate::config::RelaySettings;
    use crate::transport::ServerAction;

    const DENY_BLINKS: u32 = 3;
    const BLINK_INTERVAL: Duration = Duration::from_millis(500);

    struct Pins {
        gate: OutputPin,
        led: OutputPin,
    }

    /// Drives the barrier relay and status LED.
    ///
    /// Pulses run on a short-lived thread so the orchestrator never waits for the gate.
    pub struct GpioRelay {
        pins: Arc<Mutex<Pins>>,
        busy: Arc<AtomicBool>,
        open_duration: Duration,
    }

    impl GpioRelay {
        pub fn new(settings: &RelaySettings) -> Result<Self> {
            let gpio = Gpio::new().context("open GPIO")?;
            let mut gate = gpio
                .get(settings.gate_pin)
                .with_context(|| format!("claim gate pin {}", settings.gate_pin))?
                .into_output();
            let mut led = gpio
                .get(settings.led_pin)
                .with_context(|| format!("claim led pin {}", settings.led_pin))?
                .into_output();
            gate.set_low();
            led.set_low();
            log::info!(
                "GpioRelay: gate pin {}, led pin {}",
                settings.gate_pin,
                settings.led_pin
            );
            Ok(Self {
                pins: Arc::new(Mutex::new(Pins { gate, led })),
                busy: Arc::new(AtomicBool::new(false)),
                open_duration: settings.open_duration,
            })
        }

        fn spawn_pulse<F>(&self, what: &str, pulse: F) -> Result<()>
        where
            F: FnOnce(&Mutex<Pins>) + Send + 'static,
        {
            if self.busy.swap(true, Ordering::SeqCst) {
                log::info!("gate relay busy, skipping {}", what);
                return Ok(());
            }
            let pins = self.pins.clone();
            let busy = self.busy.clone();
            let spawned = std::thread::Builder::new()
                .name("gate-relay".to_string())
                .spawn(move || {
                    pulse(pins.as_ref());
                    busy.store(false, Ordering::SeqCst);
                });
            if let Err(err) = spawned {
                self.busy.store(false, Ordering::SeqCst);
                return Err(err).context("spawn gate relay thread");
            }
            Ok(())
        }
    }

    fn with_pins(pins: &Mutex<Pins>, f: impl FnOnce(&mut Pins)) {
        let mut guard = pins.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }

    impl Relay for GpioRelay {
        fn name(&self) -> &'static str {
            "gpio"
        }

        fn apply(&mut self, action: &ServerAction) -> Result<()> {
            match action {
                ServerAction::Grant => {
                    let open_for = self.open_duration;
                    self.open_gate(open_for)
                }
                ServerAction::Deny => self.spawn_pulse("deny blink", |pins| {
                    for _ in 0..DENY_BLINKS {
                        with_pins(pins, |p| p.led.set_high());
                        std::thread::sleep(BLINK_INTERVAL);
                        with_pins(pins, |p| p.led.set_low());
                        std::thread::sleep(BLINK_INTERVAL);
                    }
                }),
                ServerAction::Ack => Ok(()),
                ServerAction::Unknown(raw) => {
                    log::warn!("ignoring unknown server action {:?}", raw);
                    Ok(())
                }
            }
        }

        fn open_gate(&mut self, duration: Duration) -> Result<()> {
            self.spawn_pulse("open", move |pins| {
                log::info!("opening gate for {:?}", duration);
                with_pins(pins, |p| {
                    p.gate.set_high();
                    p.led.set_high();
                });
                std::thread::sleep(duration);
                with_pins(pins, |p| {
                    p.gate.set_low();
                    p.led.set_low();
                });
                log::info!("gate closed");
            })
        }

        /// Drops the gate output at once. A running open pulse still ends normally.
        fn close_gate(&mut self) -> Result<()> {
            with_pins(&self.pins, |p| {
                p.gate.set_low();
                p.led.set_low();
            });
            log::info!("gate closed by command");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_relay_accepts_every_action() {
        let mut relay = LogRelay;
        for action in [
            ServerAction::Grant,
            ServerAction::Deny,
            ServerAction::Ack,
            ServerAction::Unknown("x".into()),
        ] {
            relay.apply(&action).unwrap();
        }
    }

    #[test]
    fn builds_log_relay_by_default() {
        let relay = build_relay(&RelaySettings {
            backend: RelayKind::Log,
            gate_pin: 18,
            led_pin: 16,
            open_duration: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(relay.name(), "log");
    }

    #[derive(Default)]
    struct Recording {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Relay for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn apply(&mut self, action: &ServerAction) -> Result<()> {
            self.calls.lock().unwrap().push(format!("{:?}", action));
            Ok(())
        }

        fn open_gate(&mut self, duration: Duration) -> Result<()> {
            self.calls.lock().unwrap().push(format!("open {}s", duration.as_secs()));
            Ok(())
        }

        fn close_gate(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("close".to_string());
            Ok(())
        }
    }

    #[test]
    fn handle_clones_share_one_relay() {
        let relay = Recording::default();
        let calls = relay.calls.clone();
        let handle = RelayHandle::new(Box::new(relay));
        let other = handle.clone();
        assert_eq!(other.name(), "recording");

        handle.apply(&ServerAction::Grant).unwrap();
        other.open_gate(Duration::from_secs(7)).unwrap();
        other.close_gate().unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["Grant", "open 7s", "close"]);
    }
}
