//! Scheduled parking-area monitoring.
//!
//! The scanner only produces tokens. Captures run in the orchestrator like any other
//! cycle, so an area scan never overlaps a trigger or command capture.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike};
use sha2::{Digest, Sha256};

use crate::config::{AreaSettings, CameraRole};
use crate::shutdown::Shutdown;
use crate::trigger::{TriggerMailbox, TriggerSource, TriggerToken};

/// How often a scanner rechecks a full mailbox.
const OFFER_RETRY: Duration = Duration::from_millis(100);

/// Capture interval by local hour of day.
#[derive(Clone, Debug)]
pub struct AreaSchedule {
    peak_hours: Vec<u32>,
    peak_interval: Duration,
    off_peak_interval: Duration,
}

impl AreaSchedule {
    pub fn from_settings(settings: &AreaSettings) -> Self {
        Self {
            peak_hours: settings.peak_hours.clone(),
            peak_interval: settings.peak_interval,
            off_peak_interval: settings.off_peak_interval,
        }
    }

    pub fn interval_for_hour(&self, hour: u32) -> Duration {
        if self.peak_hours.contains(&hour) {
            self.peak_interval
        } else {
            self.off_peak_interval
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.interval_for_hour(Local::now().hour())
    }
}

/// Offers one scan per configured area, then sleeps for the scheduled interval.
pub struct AreaScanner {
    areas: Vec<String>,
    schedule: AreaSchedule,
    role: CameraRole,
    mailbox: Arc<TriggerMailbox>,
    next_seq: u64,
}

impl AreaScanner {
    pub fn new(settings: &AreaSettings, role: CameraRole, mailbox: Arc<TriggerMailbox>) -> Self {
        Self {
            areas: settings.areas.clone(),
            schedule: AreaSchedule::from_settings(settings),
            role,
            mailbox,
            next_seq: 1,
        }
    }

    /// Hand every area to the orchestrator once, waiting while the mailbox is full.
    ///
    /// Returns how many scans were handed over; fewer than the area count means
    /// shutdown was raised.
    pub fn scan_round(&mut self, shutdown: &Shutdown) -> usize {
        let areas = self.areas.clone();
        let mut offered = 0;
        for area_id in areas {
            let token = TriggerToken::local(
                self.next_seq,
                self.role.clone(),
                TriggerSource::AreaScan { area_id },
            );
            self.next_seq += 1;
            while !self.mailbox.offer(token.clone()) {
                if shutdown.wait_timeout(OFFER_RETRY) {
                    return offered;
                }
            }
            offered += 1;
        }
        offered
    }

    pub fn run(mut self, shutdown: Shutdown) {
        log::info!("area monitor started for {}", self.areas.join(", "));
        loop {
            if self.scan_round(&shutdown) < self.areas.len() {
                break;
            }
            let interval = self.schedule.current_interval();
            log::debug!("next area scan in {:?}", interval);
            if shutdown.wait_timeout(interval) {
                break;
            }
        }
        self.mailbox.notify();
        log::info!("area monitor stopped");
    }
}

/// SHA-256 of an encoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDigest([u8; 32]);

impl FrameDigest {
    pub fn of(frame: &[u8]) -> Self {
        Self(Sha256::digest(frame).into())
    }
}

/// Last analysed frame per area, so an identical frame is not uploaded again.
#[derive(Debug, Default)]
pub struct FrameChangeTracker {
    last: HashMap<String, FrameDigest>,
}

impl FrameChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_changed(&self, area_id: &str, digest: &FrameDigest) -> bool {
        self.last.get(area_id) != Some(digest)
    }

    /// Remember a frame once its analysis was accepted.
    pub fn record(&mut self, area_id: &str, digest: FrameDigest) {
        self.last.insert(area_id.to_string(), digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::CaptureSlot;

    fn settings(areas: &[&str]) -> AreaSettings {
        AreaSettings {
            enabled: true,
            areas: areas.iter().map(|a| a.to_string()).collect(),
            peak_hours: vec![7, 8, 17, 18, 19],
            peak_interval: Duration::from_secs(15),
            off_peak_interval: Duration::from_secs(60),
            attempts: 3,
        }
    }

    #[test]
    fn peak_hours_use_the_short_interval() {
        let schedule = AreaSchedule::from_settings(&settings(&["area1"]));
        assert_eq!(schedule.interval_for_hour(8), Duration::from_secs(15));
        assert_eq!(schedule.interval_for_hour(18), Duration::from_secs(15));
        assert_eq!(schedule.interval_for_hour(3), Duration::from_secs(60));
        assert_eq!(schedule.interval_for_hour(12), Duration::from_secs(60));
    }

    #[test]
    fn scan_round_offers_each_area_in_order() {
        let mailbox = Arc::new(TriggerMailbox::new());
        let slot = Arc::new(CaptureSlot::new());
        let mut scanner =
            AreaScanner::new(&settings(&["north", "south"]), CameraRole::Area, mailbox.clone());

        let consumer = {
            let mailbox = mailbox.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                while seen.len() < 2 {
                    if let Some((token, _guard)) = mailbox.wait_take(&slot, Duration::from_secs(5)) {
                        seen.push(token);
                    }
                }
                seen
            })
        };
        assert_eq!(scanner.scan_round(&Shutdown::new()), 2);

        let seen = consumer.join().unwrap();
        assert_eq!(
            seen.iter().map(|t| t.source.clone()).collect::<Vec<_>>(),
            vec![
                TriggerSource::AreaScan { area_id: "north".into() },
                TriggerSource::AreaScan { area_id: "south".into() },
            ]
        );
        assert!(seen[0].seq < seen[1].seq);
    }

    #[test]
    fn full_mailbox_yields_to_shutdown() {
        let mailbox = Arc::new(TriggerMailbox::new());
        mailbox.offer(TriggerToken::local(1, CameraRole::Area, TriggerSource::Server));
        let mut scanner = AreaScanner::new(&settings(&["area1"]), CameraRole::Area, mailbox);
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });
        assert_eq!(scanner.scan_round(&shutdown), 0);
        stopper.join().unwrap();
    }

    #[test]
    fn unchanged_frames_are_detected_per_area() {
        let mut tracker = FrameChangeTracker::new();
        let frame = FrameDigest::of(&[1, 2, 3]);
        assert!(tracker.has_changed("north", &frame));
        tracker.record("north", frame);
        assert!(!tracker.has_changed("north", &frame));
        assert!(tracker.has_changed("south", &frame));
        assert!(tracker.has_changed("north", &FrameDigest::of(&[1, 2, 4])));
    }
}
