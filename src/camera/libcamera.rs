//! Pi camera backend.
//!
//! Captures stills through the libcamera command-line tools (`libcamera-still`, or
//! `rpicam-still` on newer images), reading the JPEG from stdout. No frame is written
//! to disk.

use std::time::Duration;

use super::{CameraBackend, ImageBytes};
use crate::config::CameraSettings;
use crate::error::CameraError;
use crate::process::{run_with_timeout, ProcessError};

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const BACKEND: &str = "pi";

pub struct PiCamera {
    settings: CameraSettings,
    open: bool,
}

impl PiCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            open: false,
        }
    }

    fn capture_args(&self) -> Vec<String> {
        vec![
            "--nopreview".to_string(),
            "--immediate".to_string(),
            "--timeout".to_string(),
            "1".to_string(),
            "--encoding".to_string(),
            "jpg".to_string(),
            "--width".to_string(),
            self.settings.width.to_string(),
            "--height".to_string(),
            self.settings.height.to_string(),
            "--output".to_string(),
            "-".to_string(),
        ]
    }
}

impl CameraBackend for PiCamera {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn open(&mut self) -> Result<(), CameraError> {
        let listing = run_with_timeout(
            &self.settings.pi_command,
            &["--list-cameras".to_string()],
            None,
            VERSION_CHECK_TIMEOUT,
        )
        .map_err(|err| CameraError::BackendUnavailable {
            backend: BACKEND,
            reason: err.to_string(),
        })?;
        let listing = String::from_utf8_lossy(&listing);
        if listing.trim().is_empty() || listing.contains("No cameras available") {
            return Err(CameraError::BackendUnavailable {
                backend: BACKEND,
                reason: "libcamera reports no attached camera".to_string(),
            });
        }
        self.open = true;
        log::info!(
            "PiCamera: using {} ({}x{})",
            self.settings.pi_command,
            self.settings.width,
            self.settings.height
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<ImageBytes, CameraError> {
        if !self.open {
            return Err(CameraError::NotOpen);
        }
        let frame = run_with_timeout(
            &self.settings.pi_command,
            &self.capture_args(),
            None,
            self.settings.capture_timeout,
        )
        .map_err(|err| capture_error(&err))?;
        if frame.is_empty() {
            return Err(CameraError::Capture {
                backend: BACKEND,
                reason: "empty frame".to_string(),
            });
        }
        Ok(frame)
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn capture_error(err: &ProcessError) -> CameraError {
    match err {
        // The tool disappearing between open and capture means the backend is gone.
        ProcessError::Spawn { .. } => CameraError::BackendUnavailable {
            backend: BACKEND,
            reason: err.to_string(),
        },
        _ => CameraError::Capture {
            backend: BACKEND,
            reason: err.to_string(),
        },
    }
}
