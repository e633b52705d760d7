pub mod command;
pub mod stub;

pub use command::CommandDetector;
pub use stub::{NoneDetector, StubDetector};

use anyhow::{anyhow, Result};

use crate::config::{DetectionSettings, DetectorKind};

use super::PlateDetector;

/// Build the detector selected by configuration.
///
/// With detection disabled the `none` backend is used regardless of `backend`, so
/// every trigger still produces a report carrying the captured image.
pub fn build_detector(settings: &DetectionSettings) -> Result<Box<dyn PlateDetector>> {
    if !settings.enabled {
        return Ok(Box::new(NoneDetector));
    }
    match settings.backend {
        DetectorKind::None => Ok(Box::new(NoneDetector)),
        DetectorKind::Stub => Ok(Box::new(StubDetector::new(
            settings.plate.clone(),
            settings.confidence,
        ))),
        DetectorKind::Command => {
            let program = settings
                .command
                .clone()
                .ok_or_else(|| anyhow!("detection.command is required for the command backend"))?;
            Ok(Box::new(CommandDetector::new(
                program,
                settings.args.clone(),
                settings.timeout,
            )))
        }
    }
}
