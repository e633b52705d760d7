//! Plate detection adapter.
//!
//! The recognition algorithm itself is external. This module defines the seam
//! (`PlateDetector`), a few backends, and `DetectorRunner`, which bounds every
//! detection call by a timeout so a wedged detector cannot stall a capture cycle.

pub mod backends;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::error::DetectError;

pub use backends::{build_detector, CommandDetector, NoneDetector, StubDetector};

/// A plate reading returned by a detector.
#[derive(Clone, Debug, PartialEq)]
pub struct PlateReading {
    pub plate: String,
    /// Always within [0, 1].
    pub confidence: f32,
}

impl PlateReading {
    /// Build a reading, clamping the confidence into [0, 1].
    ///
    /// Returns `None` for an empty plate, which counts as "no detection".
    pub fn new(plate: impl Into<String>, confidence: f32) -> Option<Self> {
        let plate = plate.into().trim().to_string();
        if plate.is_empty() {
            return None;
        }
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Some(Self { plate, confidence })
    }
}

/// Detector backend trait.
///
/// Implementations receive the encoded frame read-only and must not retain it
/// beyond the call.
pub trait PlateDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one encoded frame. `Ok(None)` means nothing was found.
    fn detect(&mut self, image: &[u8]) -> Result<Option<PlateReading>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Job {
    image: Vec<u8>,
    reply: mpsc::SyncSender<Result<Option<PlateReading>, DetectError>>,
}

/// Runs a detector on its own thread and enforces the detection timeout.
pub struct DetectorRunner {
    name: &'static str,
    jobs: mpsc::Sender<Job>,
    busy: Arc<AtomicBool>,
    timeout: Duration,
}

impl DetectorRunner {
    pub fn spawn(mut detector: Box<dyn PlateDetector>, timeout: Duration) -> Result<Self> {
        let name = detector.name();
        if let Err(err) = detector.warm_up() {
            log::warn!("detector {} warm-up failed: {}", name, err);
        }

        let (jobs, rx) = mpsc::channel::<Job>();
        let busy = Arc::new(AtomicBool::new(false));
        let worker_busy = busy.clone();
        std::thread::Builder::new()
            .name("detector".to_string())
            .spawn(move || {
                for job in rx {
                    let result = detector
                        .detect(&job.image)
                        .map(|reading| {
                            reading.and_then(|r| PlateReading::new(r.plate, r.confidence))
                        })
                        .map_err(|err| DetectError::Failed(err.to_string()));
                    worker_busy.store(false, Ordering::SeqCst);
                    let _ = job.reply.send(result);
                }
                log::debug!("detector {} worker stopped", name);
            })?;

        Ok(Self {
            name,
            jobs,
            busy,
            timeout,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Detect on `image`, waiting at most the configured timeout.
    ///
    /// After a timeout the detector keeps running on the old frame; until it returns,
    /// further calls fail immediately with `DetectError::Busy`.
    pub fn detect(&self, image: &[u8]) -> Result<Option<PlateReading>, DetectError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(DetectError::Busy);
        }
        let (reply, result) = mpsc::sync_channel(1);
        let job = Job {
            image: image.to_vec(),
            reply,
        };
        if self.jobs.send(job).is_err() {
            self.busy.store(false, Ordering::SeqCst);
            return Err(DetectError::Failed("detector worker stopped".to_string()));
        }
        match result.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DetectError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                self.busy.store(false, Ordering::SeqCst);
                Err(DetectError::Failed("detector worker stopped".to_string()))
            }
        }
    }
}
