use super::{CameraBackend, ImageBytes};
use crate::error::CameraError;

/// Synthetic camera for `stub://` device paths.
///
/// - `stub://fail` never opens
/// - `stub://broken` opens but every capture fails
/// - `stub://flaky` fails every second capture
/// - anything else always succeeds
///
/// Frames are small JPEG-framed buffers carrying a frame counter.
pub struct SyntheticCamera {
    name: &'static str,
    device: String,
    open: bool,
    frame_count: u64,
    capture_calls: u64,
}

impl SyntheticCamera {
    pub fn new(name: &'static str, device: &str) -> Self {
        Self {
            name,
            device: device.to_string(),
            open: false,
            frame_count: 0,
            capture_calls: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn variant(&self) -> &str {
        self.device.trim_start_matches("stub://")
    }
}

impl CameraBackend for SyntheticCamera {
    fn name(&self) -> &'static str {
        self.name
    }

    fn open(&mut self) -> Result<(), CameraError> {
        if self.variant() == "fail" {
            return Err(CameraError::BackendUnavailable {
                backend: self.name,
                reason: format!("{} is not connected", self.device),
            });
        }
        self.open = true;
        log::info!("SyntheticCamera: connected to {} (synthetic)", self.device);
        Ok(())
    }

    fn capture(&mut self) -> Result<ImageBytes, CameraError> {
        if !self.open {
            return Err(CameraError::NotOpen);
        }
        self.capture_calls += 1;
        let fails = match self.variant() {
            "broken" => true,
            "flaky" => self.capture_calls % 2 == 1,
            _ => false,
        };
        if fails {
            return Err(CameraError::Capture {
                backend: self.name,
                reason: format!("{} dropped the frame", self.device),
            });
        }

        self.frame_count += 1;
        let mut frame = vec![0xFF, 0xD8, 0xFF, 0xE0];
        frame.extend_from_slice(&self.frame_count.to_be_bytes());
        frame.extend_from_slice(&[0xFF, 0xD9]);
        Ok(frame)
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
