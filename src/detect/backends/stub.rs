use anyhow::Result;

use crate::detect::{PlateDetector, PlateReading};

/// Backend that never finds a plate.
///
/// Reports still carry the image, leaving recognition to the server or an operator.
#[derive(Default)]
pub struct NoneDetector;

impl PlateDetector for NoneDetector {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect(&mut self, _image: &[u8]) -> Result<Option<PlateReading>> {
        Ok(None)
    }
}

/// Stub backend for testing. Returns the same reading for every frame.
pub struct StubDetector {
    plate: String,
    confidence: f32,
}

impl StubDetector {
    pub fn new(plate: impl Into<String>, confidence: f32) -> Self {
        Self {
            plate: plate.into(),
            confidence,
        }
    }
}

impl PlateDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &[u8]) -> Result<Option<PlateReading>> {
        if image.is_empty() {
            return Ok(None);
        }
        Ok(PlateReading::new(self.plate.clone(), self.confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_ignores_empty_frames() {
        let mut detector = StubDetector::new("XYZ789", 0.7);
        assert_eq!(detector.detect(&[]).unwrap(), None);
        assert_eq!(detector.detect(&[1]).unwrap().unwrap().plate, "XYZ789");
        assert_eq!(NoneDetector.detect(&[1]).unwrap(), None);
    }
}
